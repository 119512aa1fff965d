/// Shadow map pass and PCF lookup: factor bounds, occlusion geometry and
/// the end-to-end sphere-over-plane scene.
use glam::{Mat4, Vec3};

use polyshade::rendering::PhongParams;
use polyshade::{Color, Light, Material, Mesh, Rasterizer, Shader};

const LIGHT_POS: Vec3 = Vec3::new(2.0, 2.0, 2.0);

fn shadow_scene() -> (Rasterizer, Mesh, Mesh) {
    let mut rasterizer = Rasterizer::new(160, 120);
    rasterizer.set_shadows_enabled(true);

    let sphere = Mesh::sphere(16, 16, Color::WHITE);
    let mut floor = Mesh::plane(20.0, 20.0, Color::WHITE);
    floor.set_model_matrix(Mat4::from_translation(Vec3::new(0.0, -0.5, 0.0)));

    (rasterizer, sphere, floor)
}

fn render_shadow_maps(rasterizer: &mut Rasterizer, sphere: &Mesh, floor: &Mesh) {
    let light_dir = (Vec3::ZERO - LIGHT_POS).normalize();
    rasterizer.begin_shadow_pass();
    rasterizer.render_shadow_map(sphere, LIGHT_POS, light_dir);
    rasterizer.render_shadow_map(floor, LIGHT_POS, light_dir);
}

#[test]
fn point_behind_the_sphere_is_occluded() {
    let (mut rasterizer, sphere, floor) = shadow_scene();
    render_shadow_maps(&mut rasterizer, &sphere, &floor);

    // On the floor, on the far side of the sphere from the light: the
    // light ray towards it passes through the sphere.
    let occluded = rasterizer
        .shadow_map()
        .factor_at(Vec3::new(-0.5, -0.5, -0.5));
    assert!(occluded <= 0.5, "umbra factor was {occluded}");
    assert!(
        (occluded - 0.15).abs() < 1e-5,
        "center of the umbra should be fully occluded, got {occluded}"
    );
}

#[test]
fn floor_far_from_the_shadow_is_fully_lit() {
    let (mut rasterizer, sphere, floor) = shadow_scene();
    render_shadow_maps(&mut rasterizer, &sphere, &floor);

    let lit = rasterizer.shadow_map().factor_at(Vec3::new(-3.0, -0.5, 2.0));
    assert_eq!(lit, 1.0);
}

#[test]
fn shadow_factors_stay_within_bounds() {
    let (mut rasterizer, sphere, floor) = shadow_scene();
    render_shadow_maps(&mut rasterizer, &sphere, &floor);

    let map = rasterizer.shadow_map();
    for ix in 0..40 {
        for iz in 0..40 {
            let x = -5.0 + ix as f32 * 0.25;
            let z = -5.0 + iz as f32 * 0.25;
            let factor = map.factor_at(Vec3::new(x, -0.5, z));
            assert!(
                (0.15..=1.0).contains(&factor),
                "factor {factor} out of bounds at ({x}, {z})"
            );
        }
    }
}

#[test]
fn floor_without_casters_is_unshadowed() {
    let (mut rasterizer, _sphere, floor) = shadow_scene();
    let light_dir = (Vec3::ZERO - LIGHT_POS).normalize();

    rasterizer.begin_shadow_pass();
    rasterizer.render_shadow_map(&floor, LIGHT_POS, light_dir);

    // The floor's own depth is stored, but the bias keeps it lit.
    let map = rasterizer.shadow_map();
    for &p in &[
        Vec3::new(0.0, -0.5, 0.0),
        Vec3::new(2.0, -0.5, -3.0),
        Vec3::new(-4.0, -0.5, 4.0),
    ] {
        assert_eq!(map.factor_at(p), 1.0);
    }
}

#[test]
fn rendered_scene_darkens_under_the_sphere_only() {
    let (mut rasterizer, sphere, floor) = shadow_scene();

    let camera_pos = Vec3::new(0.0, 2.0, 6.0);
    let mut shader = Shader::new(Material::Phong(PhongParams::default()));
    shader.camera_pos = camera_pos;
    shader.view = Mat4::look_at_rh(camera_pos, Vec3::ZERO, Vec3::Y);
    shader.projection =
        Mat4::perspective_rh_gl(60f32.to_radians(), 160.0 / 120.0, 0.1, 100.0);
    shader.add_light(Light::point(LIGHT_POS, 20.0, Color::WHITE, 1.0));

    let draw = |rasterizer: &mut Rasterizer, shadows: bool| {
        rasterizer.set_shadows_enabled(shadows);
        rasterizer.clear(Color::BLACK);
        if shadows {
            render_shadow_maps(rasterizer, &sphere, &floor);
        }
        rasterizer.render_mesh(&floor, &shader);
        rasterizer.render_mesh(&sphere, &shader);
        rasterizer.color_buffer().to_vec()
    };

    let unshadowed = draw(&mut rasterizer, false);
    let shadowed = draw(&mut rasterizer, true);

    let mut darkened = 0usize;
    for (with, without) in shadowed.iter().zip(&unshadowed) {
        let a = Color::from_u32(*with);
        let b = Color::from_u32(*without);
        assert!(
            a.r <= b.r && a.g <= b.g && a.b <= b.b,
            "shadows must never brighten a pixel"
        );
        if a.r < b.r || a.g < b.g || a.b < b.b {
            darkened += 1;
        }
    }
    assert!(darkened > 0, "the cast shadow must darken some floor pixels");
}
