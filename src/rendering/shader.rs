/// Programmable stages of the pipeline: the vertex stage shared by all
/// materials, and the per-material fragment stages (flat, Blinn-ish Phong,
/// cel-shaded toon).
use glam::{Mat4, Vec2, Vec3, Vec4};
use log::warn;

use super::color::Color;
use crate::mesh::Vertex;

/// Hard cap on the light list; pushes beyond it are dropped.
pub const MAX_LIGHTS: usize = 8;

/// Everything the vertex stage produces for one vertex. The record is
/// linearly combinable: clipping and rasterization build new records as
/// weighted sums of these fields.
#[derive(Copy, Clone, Debug, Default)]
pub struct VertexOutput {
    /// Homogeneous clip-space position (no perspective divide applied).
    pub clip_pos: Vec4,
    pub world_pos: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
    pub color: Color,
    /// Light-clip-space position when a shadow pass is active, zero otherwise.
    pub shadow_pos: Vec4,
}

impl VertexOutput {
    /// Blend two records at parameter `t`. Used by the clipper at plane
    /// intersections; every field must be carried through or per-pixel
    /// shading shows sliver artifacts at the frustum edge.
    pub fn lerp(a: &VertexOutput, b: &VertexOutput, t: f32) -> VertexOutput {
        let s = 1.0 - t;
        VertexOutput {
            clip_pos: a.clip_pos * s + b.clip_pos * t,
            world_pos: a.world_pos * s + b.world_pos * t,
            normal: a.normal * s + b.normal * t,
            tex_coord: a.tex_coord * s + b.tex_coord * t,
            color: Color::lerp(a.color, b.color, t),
            shadow_pos: a.shadow_pos * s + b.shadow_pos * t,
        }
    }

    /// Weighted sum of three records; weights are expected to sum to 1.
    pub fn combine(
        v1: &VertexOutput,
        v2: &VertexOutput,
        v3: &VertexOutput,
        w1: f32,
        w2: f32,
        w3: f32,
    ) -> VertexOutput {
        VertexOutput {
            clip_pos: v1.clip_pos * w1 + v2.clip_pos * w2 + v3.clip_pos * w3,
            world_pos: v1.world_pos * w1 + v2.world_pos * w2 + v3.world_pos * w3,
            normal: v1.normal * w1 + v2.normal * w2 + v3.normal * w3,
            tex_coord: v1.tex_coord * w1 + v2.tex_coord * w2 + v3.tex_coord * w3,
            color: Color::weighted_sum(v1.color, v2.color, v3.color, w1, w2, w3),
            shadow_pos: v1.shadow_pos * w1 + v2.shadow_pos * w2 + v3.shadow_pos * w3,
        }
    }
}

/// Interpolated attributes handed to the fragment stage for one covered pixel.
#[derive(Copy, Clone, Debug)]
pub struct FragmentInput {
    pub world_pos: Vec3,
    /// Unit length; the rasterizer renormalizes after interpolation.
    pub normal: Vec3,
    pub tex_coord: Vec2,
    pub color: Color,
    /// 1.0 = fully lit, down to 0.15 = fully occluded.
    pub shadow_factor: f32,
}

/// What kind of emitter a light is, with the fields that only make sense
/// for that kind.
#[derive(Copy, Clone, Debug)]
pub enum LightKind {
    Directional {
        /// World-space direction the light travels in (unit).
        direction: Vec3,
    },
    Point {
        position: Vec3,
        range: f32,
    },
    Spot {
        position: Vec3,
        direction: Vec3,
        range: f32,
        /// Cone half-angle in radians.
        angle: f32,
    },
}

#[derive(Copy, Clone, Debug)]
pub struct Light {
    pub kind: LightKind,
    pub color: Color,
    pub intensity: f32,
}

impl Light {
    pub fn directional(direction: Vec3, color: Color, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional {
                direction: direction.normalize(),
            },
            color,
            intensity,
        }
    }

    pub fn point(position: Vec3, range: f32, color: Color, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point { position, range },
            color,
            intensity,
        }
    }

    pub fn spot(
        position: Vec3,
        direction: Vec3,
        range: f32,
        angle: f32,
        color: Color,
        intensity: f32,
    ) -> Self {
        Self {
            kind: LightKind::Spot {
                position,
                direction: direction.normalize(),
                range,
                angle,
            },
            color,
            intensity,
        }
    }

    /// Direction from the fragment towards the light and the scalar
    /// attenuation at that fragment. Attenuation 0 means no contribution.
    fn incidence(&self, world_pos: Vec3) -> (Vec3, f32) {
        match self.kind {
            LightKind::Directional { direction } => (-direction, 1.0),
            LightKind::Point { position, range } => {
                let to_light = position - world_pos;
                let distance = to_light.length();
                let dir = to_light / distance.max(1e-6);
                (dir, distance_attenuation(distance, range))
            }
            LightKind::Spot {
                position,
                direction,
                range,
                angle,
            } => {
                let to_light = position - world_pos;
                let distance = to_light.length();
                let dir = to_light / distance.max(1e-6);

                let cos_angle = -dir.dot(direction);
                let spot = if cos_angle > angle.cos() {
                    cos_angle.powi(4)
                } else {
                    0.0
                };

                (dir, spot * distance_attenuation(distance, range))
            }
        }
    }
}

#[inline]
fn distance_attenuation(distance: f32, range: f32) -> f32 {
    if distance > range {
        0.0
    } else {
        let att = 1.0 - distance / range;
        att * att
    }
}

#[derive(Copy, Clone, Debug)]
pub struct PhongParams {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: f32,
}

impl Default for PhongParams {
    fn default() -> Self {
        Self {
            ambient: 0.2,
            diffuse: 0.7,
            specular: 0.5,
            shininess: 32.0,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ToonParams {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: f32,
    /// Number of discrete diffuse bands.
    pub levels: u32,
    /// Silhouette threshold on N.V.
    pub outline_threshold: f32,
    pub outline_color: Color,
    pub enable_outline: bool,
}

impl Default for ToonParams {
    fn default() -> Self {
        Self {
            ambient: 0.2,
            diffuse: 0.8,
            specular: 0.5,
            shininess: 32.0,
            levels: 4,
            outline_threshold: 0.3,
            outline_color: Color::BLACK,
            enable_outline: true,
        }
    }
}

/// The fragment strategy for a draw. The three built-ins are the contract;
/// there is no user-pluggable shader surface.
#[derive(Copy, Clone, Debug)]
pub enum Material {
    /// Pass the interpolated vertex color through untouched.
    Flat,
    Phong(PhongParams),
    Toon(ToonParams),
}

/// Per-draw shader state: matrices, camera, lights and the active material.
/// Owned by the caller and read-only during a draw call.
pub struct Shader {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_pos: Vec3,
    pub material: Material,
    lights: Vec<Light>,
}

impl Shader {
    pub fn new(material: Material) -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_pos: Vec3::ZERO,
            material,
            lights: Vec::new(),
        }
    }

    pub fn add_light(&mut self, light: Light) {
        if self.lights.len() >= MAX_LIGHTS {
            warn!("light limit of {} reached, ignoring additional light", MAX_LIGHTS);
            return;
        }
        self.lights.push(light);
    }

    pub fn clear_lights(&mut self) {
        self.lights.clear();
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Vertex stage. Transforms one mesh vertex into clip space and carries
    /// the attributes the fragment stage needs. `shadow_matrix` is the
    /// light projection-view product when a shadow pass is active.
    pub fn vertex(
        &self,
        input: &Vertex,
        model: &Mat4,
        shadow_matrix: Option<&Mat4>,
    ) -> VertexOutput {
        let world = *model * input.position.extend(1.0);
        let world_pos = world.truncate();

        let clip_pos = self.projection * self.view * world;

        // Model-matrix normal transform; correct for rigid and
        // uniform-scale model matrices.
        let normal = (*model * input.normal.extend(0.0)).truncate().normalize();

        let shadow_pos = match shadow_matrix {
            Some(m) => *m * world,
            None => Vec4::ZERO,
        };

        VertexOutput {
            clip_pos,
            world_pos,
            normal,
            tex_coord: input.tex_coord,
            color: input.color,
            shadow_pos,
        }
    }

    /// Fragment stage, dispatched on the active material.
    pub fn fragment(&self, input: &FragmentInput) -> Color {
        match self.material {
            Material::Flat => input.color,
            Material::Phong(params) => self.fragment_phong(input, &params),
            Material::Toon(params) => self.fragment_toon(input, &params),
        }
    }

    fn fragment_phong(&self, input: &FragmentInput, params: &PhongParams) -> Color {
        let base = input.color;
        let mut result = base * params.ambient;

        let view_dir = (self.camera_pos - input.world_pos).normalize();

        for light in &self.lights {
            let (light_dir, attenuation) = light.incidence(input.world_pos);
            if attenuation <= 0.0 {
                continue;
            }

            let diffuse_factor = input.normal.dot(light_dir).max(0.0);
            let mut diffuse =
                base * (diffuse_factor * params.diffuse * light.intensity * attenuation);

            let mut specular = Color::BLACK;
            if diffuse_factor > 0.0 {
                let reflect_dir =
                    (input.normal * (2.0 * input.normal.dot(light_dir)) - light_dir).normalize();
                let specular_factor = view_dir.dot(reflect_dir).max(0.0).powf(params.shininess);
                specular = Color::WHITE
                    * (specular_factor * params.specular * light.intensity * attenuation);
            }

            diffuse = diffuse.modulate(light.color);
            specular = specular.modulate(light.color);

            // Shadows attenuate direct light only; the ambient term stays.
            diffuse = diffuse * input.shadow_factor;
            specular = specular * input.shadow_factor;

            result = result + diffuse + specular;
        }

        result
    }

    fn fragment_toon(&self, input: &FragmentInput, params: &ToonParams) -> Color {
        let base = input.color;
        let mut result = base * params.ambient;

        let view_dir = (self.camera_pos - input.world_pos).normalize();

        // Near-horizontal faces (ground planes) get a tighter silhouette
        // threshold so they do not self-outline, and finer banding below.
        let near_horizontal = input.normal.y.abs() > 0.99;

        if params.enable_outline {
            let edge_factor = input.normal.dot(view_dir);
            let threshold = if near_horizontal {
                0.05
            } else {
                params.outline_threshold
            };
            if edge_factor < threshold {
                return params.outline_color;
            }
        }

        for light in &self.lights {
            let (light_dir, attenuation) = light.incidence(input.world_pos);
            if attenuation <= 0.0 {
                continue;
            }

            let mut diffuse_factor = input.normal.dot(light_dir).max(0.0);
            if diffuse_factor > 0.0 {
                let levels = if near_horizontal {
                    params.levels + 2
                } else {
                    params.levels
                } as f32;
                diffuse_factor = (diffuse_factor * levels).ceil() / levels;
            }

            let mut diffuse =
                base * (diffuse_factor * params.diffuse * light.intensity * attenuation);

            let mut specular = Color::BLACK;
            if diffuse_factor > 0.0 {
                let reflect_dir =
                    (input.normal * (2.0 * input.normal.dot(light_dir)) - light_dir).normalize();
                let specular_factor = view_dir.dot(reflect_dir).max(0.0).powf(params.shininess);
                let quantized = if specular_factor > 0.7 { 1.0 } else { 0.0 };
                specular =
                    Color::WHITE * (quantized * params.specular * light.intensity * attenuation);
            }

            diffuse = diffuse.modulate(light.color);
            specular = specular.modulate(light.color);

            // Two-step shadow keeps the hard-penumbra look.
            let stepped_shadow = if near_horizontal {
                if input.shadow_factor < 0.8 {
                    0.4
                } else {
                    1.0
                }
            } else if input.shadow_factor < 0.75 {
                0.5
            } else {
                1.0
            };

            diffuse = diffuse * stepped_shadow;
            specular = specular * stepped_shadow;

            result = result + diffuse + specular;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_fragment() -> FragmentInput {
        FragmentInput {
            world_pos: Vec3::ZERO,
            normal: Vec3::Z,
            tex_coord: Vec2::ZERO,
            color: Color::WHITE,
            shadow_factor: 1.0,
        }
    }

    #[test]
    fn flat_passes_vertex_color_through() {
        let shader = Shader::new(Material::Flat);
        let mut input = unit_fragment();
        input.color = Color::rgb(13, 37, 200);
        assert_eq!(shader.fragment(&input), Color::rgb(13, 37, 200));
    }

    #[test]
    fn point_light_outside_range_contributes_nothing() {
        let mut shader = Shader::new(Material::Phong(PhongParams::default()));
        shader.camera_pos = Vec3::new(0.0, 0.0, 5.0);
        shader.add_light(Light::point(
            Vec3::new(0.0, 0.0, 100.0),
            10.0,
            Color::WHITE,
            1.0,
        ));

        let lit = shader.fragment(&unit_fragment());
        let ambient_only = Color::WHITE * 0.2;
        assert_eq!(lit, ambient_only);
    }

    #[test]
    fn light_list_is_bounded() {
        let mut shader = Shader::new(Material::Flat);
        for _ in 0..MAX_LIGHTS + 3 {
            shader.add_light(Light::directional(Vec3::NEG_Y, Color::WHITE, 1.0));
        }
        assert_eq!(shader.lights().len(), MAX_LIGHTS);
    }

    #[test]
    fn shadow_factor_spares_ambient() {
        let mut shader = Shader::new(Material::Phong(PhongParams::default()));
        shader.camera_pos = Vec3::new(0.0, 0.0, 5.0);
        shader.add_light(Light::directional(Vec3::NEG_Z, Color::WHITE, 1.0));

        let mut shadowed = unit_fragment();
        shadowed.shadow_factor = 0.15;
        let lit = shader.fragment(&unit_fragment());
        let dark = shader.fragment(&shadowed);

        let ambient_only = Color::WHITE * 0.2;
        assert!(dark.r >= ambient_only.r);
        assert!(dark.r < lit.r);
    }
}
