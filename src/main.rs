/// Demo application: window creation, input and the render loop around the
/// software rasterizer.
use glam::{Mat4, Vec3};
use log::{info, LevelFilter};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use polyshade::*;
use winit::{
    event::*,
    event_loop::{ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::WindowBuilder,
};

const WINDOW_WIDTH: usize = 800;
const WINDOW_HEIGHT: usize = 600;

fn main() {
    // The env_logger filter admits Debug; the global max level gates it so
    // the D key can raise and lower verbosity at runtime.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    log::set_max_level(LevelFilter::Info);

    println!("=== Polyshade - Software Rasterizer ===");
    println!("Controls:");
    println!("  W     - Toggle wireframe");
    println!("  D     - Toggle debug logging");
    println!("  S     - Toggle shadows");
    println!("  1/2/3 - Flat / Phong / Toon shading");
    println!("  ESC   - Exit");
    println!();

    let event_loop = EventLoop::new().unwrap();
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Polyshade")
            .with_inner_size(winit::dpi::LogicalSize::new(
                WINDOW_WIDTH as u32,
                WINDOW_HEIGHT as u32,
            ))
            .build(&event_loop)
            .unwrap(),
    );

    let context = softbuffer::Context::new(window.clone()).unwrap();
    let mut surface = softbuffer::Surface::new(&context, window.clone()).unwrap();

    let mut rasterizer = Rasterizer::new(WINDOW_WIDTH, WINDOW_HEIGHT);
    rasterizer.set_shadows_enabled(true);

    let mut camera = Camera::new(
        Vec3::new(0.0, 1.5, 5.0),
        Vec3::ZERO,
        Vec3::Y,
        60f32.to_radians(),
        WINDOW_WIDTH as f32 / WINDOW_HEIGHT as f32,
        0.1,
        100.0,
    );

    info!("building scene meshes");
    let mut cube = Mesh::cube(Color::rgb(80, 160, 80));
    let sphere = Mesh::sphere(16, 16, Color::rgb(50, 50, 200));
    let mut floor = Mesh::plane(1.0, 1.0, Color::rgb(255, 255, 255));
    floor.set_model_matrix(
        Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0))
            * Mat4::from_scale(Vec3::new(20.0, 1.0, 20.0)),
    );

    let light_pos = Vec3::new(5.0, 2.0, 5.0);
    let light_dir = (Vec3::ZERO - light_pos).normalize();

    let mut shader = Shader::new(Material::Phong(PhongParams::default()));
    shader.add_light(Light::point(light_pos, 20.0, Color::WHITE, 1.0));

    let mut debug_logging = false;
    let mut rotation = 0.0f32;
    let mut last_frame = Instant::now();
    let mut frame_count = 0u32;
    let mut fps_timer = Instant::now();

    event_loop
        .run(move |event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => {
                        elwt.exit();
                    }
                    WindowEvent::Resized(new_size) => {
                        let (w, h) = (new_size.width as usize, new_size.height as usize);
                        if w > 0 && h > 0 {
                            rasterizer.resize(w, h);
                            camera.set_aspect_ratio(w as f32 / h as f32);
                        }
                    }
                    WindowEvent::KeyboardInput { event, .. } => {
                        let pressed = event.state == ElementState::Pressed;
                        if !pressed {
                            return;
                        }

                        if let PhysicalKey::Code(keycode) = event.physical_key {
                            match keycode {
                                KeyCode::KeyW => {
                                    let wireframe = !rasterizer.wireframe_mode();
                                    rasterizer.set_wireframe_mode(wireframe);
                                    info!(
                                        "wireframe mode: {}",
                                        if wireframe { "ON" } else { "OFF" }
                                    );
                                }
                                KeyCode::KeyD => {
                                    debug_logging = !debug_logging;
                                    log::set_max_level(if debug_logging {
                                        LevelFilter::Debug
                                    } else {
                                        LevelFilter::Info
                                    });
                                    info!(
                                        "debug logging: {}",
                                        if debug_logging { "ON" } else { "OFF" }
                                    );
                                }
                                KeyCode::KeyS => {
                                    let shadows = !rasterizer.shadows_enabled();
                                    rasterizer.set_shadows_enabled(shadows);
                                    info!("shadows: {}", if shadows { "ON" } else { "OFF" });
                                }
                                KeyCode::Digit1 => {
                                    shader.material = Material::Flat;
                                    info!("material: flat");
                                }
                                KeyCode::Digit2 => {
                                    shader.material = Material::Phong(PhongParams::default());
                                    info!("material: phong");
                                }
                                KeyCode::Digit3 => {
                                    shader.material = Material::Toon(ToonParams {
                                        outline_threshold: 0.2,
                                        ..ToonParams::default()
                                    });
                                    info!("material: toon");
                                }
                                KeyCode::Escape => {
                                    elwt.exit();
                                }
                                _ => {}
                            }
                        }
                    }
                    WindowEvent::RedrawRequested => {
                        let now = Instant::now();
                        let dt = (now - last_frame).as_secs_f32();
                        last_frame = now;

                        rotation += 0.7 * dt;
                        cube.set_model_matrix(
                            Mat4::from_translation(Vec3::new(1.5, 0.0, 0.0))
                                * Mat4::from_rotation_y(rotation),
                        );

                        shader.camera_pos = camera.position();
                        shader.view = camera.view_matrix();
                        shader.projection = camera.projection_matrix();

                        rasterizer.clear(Color::rgb(20, 20, 20));

                        if rasterizer.shadows_enabled() {
                            rasterizer.begin_shadow_pass();
                            rasterizer.render_shadow_map(&sphere, light_pos, light_dir);
                            rasterizer.render_shadow_map(&cube, light_pos, light_dir);
                            rasterizer.render_shadow_map(&floor, light_pos, light_dir);
                        }

                        rasterizer.render_mesh(&floor, &shader);
                        rasterizer.render_mesh(&sphere, &shader);
                        rasterizer.render_mesh(&cube, &shader);

                        surface
                            .resize(
                                NonZeroU32::new(rasterizer.width() as u32).unwrap(),
                                NonZeroU32::new(rasterizer.height() as u32).unwrap(),
                            )
                            .unwrap();

                        let mut buffer = surface.buffer_mut().unwrap();
                        buffer.copy_from_slice(rasterizer.color_buffer());
                        buffer.present().unwrap();

                        frame_count += 1;
                        if fps_timer.elapsed().as_secs() >= 1 {
                            info!("FPS: {}", frame_count);
                            frame_count = 0;
                            fps_timer = Instant::now();
                        }
                    }
                    _ => {}
                },
                Event::AboutToWait => {
                    window.request_redraw();
                }
                _ => {}
            }
        })
        .unwrap();
}
