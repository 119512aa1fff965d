/// The graphics pipeline kernel: per-triangle vertex staging, backface
/// culling, homogeneous clipping, fan triangulation and perspective-correct
/// barycentric scan conversion with depth test.
///
/// Degenerate geometry (zero area, w near zero, fully outside the frustum)
/// is skipped silently; nothing in the inner loops raises an error.
use glam::{Vec2, Vec3};
use log::{debug, info, trace};
use rayon::prelude::*;

use super::clipper::clip_triangle;
use super::color::Color;
use super::framebuffer::{Framebuffer, FrameSlice};
use super::shader::{FragmentInput, Shader, VertexOutput};
use super::shadow::{ShadowMap, SHADOW_MAP_SIZE};
use crate::mesh::Mesh;

/// Triangles whose best-facing dot product falls below this are culled.
/// Generous on purpose: silhouette-grazing triangles must survive
/// interpolation error in the cheap normal transform.
const BACKFACE_DOT_THRESHOLD: f32 = -0.7;

/// Slope-scale factor for the per-triangle depth bias.
const DEPTH_BIAS_SCALE: f32 = 1e-5;

/// Slack on the barycentric coverage sum.
const COVERAGE_EPS: f32 = 1e-5;

/// Vertices closer to w = 0 than this cannot be perspective-divided.
const MIN_CLIP_W: f32 = 1e-6;

/// Thresholds below which stripe-parallel rasterization is not worth the
/// fork/join overhead.
const PARALLEL_MIN_TRIANGLES: usize = 32;
const PARALLEL_MIN_HEIGHT: usize = 128;

const WIRE_FRONT_COLOR: Color = Color::rgb(255, 255, 255);
const WIRE_BACK_COLOR: Color = Color::rgb(255, 0, 0);

/// A triangle that survived culling and clipping, projected to screen
/// space with everything the per-pixel loop needs precomputed.
struct ScreenTriangle {
    attrs: [VertexOutput; 3],
    screen: [Vec2; 3],
    /// Viewport-mapped depth at each vertex.
    z: [f32; 3],
    /// 1 / clip w at each vertex, for perspective-correct interpolation.
    inv_w: [f32; 3],
    min_x: i32,
    max_x: i32,
    min_y: i32,
    max_y: i32,
    // Barycentric setup against vertex 0; constant across the triangle.
    edge0: Vec2,
    edge1: Vec2,
    d00: f32,
    d01: f32,
    d11: f32,
    inv_denom: f32,
    /// Slope-scaled bias subtracted from the tested depth.
    depth_bias: f32,
    /// Zero screen area: skipped by the fill loop, still wireframed.
    fillable: bool,
    front_facing: bool,
}

impl ScreenTriangle {
    /// Scan-convert into one stripe. Only rows owned by the slice are
    /// touched, so disjoint slices can run in parallel.
    fn rasterize_into(
        &self,
        slice: &mut FrameSlice<'_>,
        shader: &Shader,
        shadow: Option<&ShadowMap>,
    ) {
        if !self.fillable {
            return;
        }

        let (rows_start, rows_end) = slice.y_range();
        let min_y = self.min_y.max(rows_start as i32);
        let max_y = self.max_y.min(rows_end as i32 - 1);
        if min_y > max_y {
            return;
        }

        let a = self.screen[0];
        let [w1, w2, w3] = self.inv_w;
        let [z1, z2, z3] = self.z;

        for y in min_y..=max_y {
            for x in self.min_x..=self.max_x {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let v2 = p - a;
                let d20 = v2.dot(self.edge0);
                let d21 = v2.dot(self.edge1);

                let beta = (self.d11 * d20 - self.d01 * d21) * self.inv_denom;
                let gamma = (self.d00 * d21 - self.d01 * d20) * self.inv_denom;
                let alpha = 1.0 - beta - gamma;

                if alpha < 0.0
                    || beta < 0.0
                    || gamma < 0.0
                    || alpha + beta + gamma > 1.0 + COVERAGE_EPS
                {
                    continue;
                }

                let w_interp = alpha * w1 + beta * w2 + gamma * w3;
                if w_interp.abs() < MIN_CLIP_W {
                    continue;
                }
                let z_interp =
                    (alpha * z1 * w1 + beta * z2 * w2 + gamma * z3 * w3) / w_interp;
                let depth = z_interp - self.depth_bias;

                if let Some(index) = slice.test_depth_and_get_index(x as usize, y as usize, depth)
                {
                    // Perspective-correct attribute weights.
                    let alpha_p = w1 * alpha / w_interp;
                    let beta_p = w2 * beta / w_interp;
                    let gamma_p = w3 * gamma / w_interp;

                    let interp = VertexOutput::combine(
                        &self.attrs[0],
                        &self.attrs[1],
                        &self.attrs[2],
                        alpha_p,
                        beta_p,
                        gamma_p,
                    );

                    let shadow_factor = match shadow {
                        Some(map) => map.sample(interp.shadow_pos),
                        None => 1.0,
                    };

                    let fragment = FragmentInput {
                        world_pos: interp.world_pos,
                        normal: interp.normal.normalize_or_zero(),
                        tex_coord: interp.tex_coord,
                        color: interp.color,
                        shadow_factor,
                    };

                    slice.write_color(index, shader.fragment(&fragment).to_u32());
                }
            }
        }
    }
}

pub struct Rasterizer {
    framebuffer: Framebuffer,
    shadow: ShadowMap,
    wireframe_mode: bool,
    shadows_enabled: bool,
}

impl Rasterizer {
    /// Panics if either dimension is zero; that is a configuration error,
    /// not a drawing error.
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "rasterizer needs a non-empty raster");
        info!("rasterizer initialized at {}x{}", width, height);
        Self {
            framebuffer: Framebuffer::new(width, height),
            shadow: ShadowMap::new(SHADOW_MAP_SIZE),
            wireframe_mode: false,
            shadows_enabled: false,
        }
    }

    pub fn width(&self) -> usize {
        self.framebuffer.width
    }

    pub fn height(&self) -> usize {
        self.framebuffer.height
    }

    /// Reset color to `color` and depth to the far sentinel.
    pub fn clear(&mut self, color: Color) {
        self.framebuffer.clear(color.to_u32());
    }

    pub fn set_wireframe_mode(&mut self, enabled: bool) {
        self.wireframe_mode = enabled;
    }

    pub fn wireframe_mode(&self) -> bool {
        self.wireframe_mode
    }

    pub fn set_shadows_enabled(&mut self, enabled: bool) {
        self.shadows_enabled = enabled;
    }

    pub fn shadows_enabled(&self) -> bool {
        self.shadows_enabled
    }

    /// Packed ARGB color buffer for presentation.
    pub fn color_buffer(&self) -> &[u32] {
        self.framebuffer.color_buffer()
    }

    pub fn depth_buffer(&self) -> &[f32] {
        self.framebuffer.depth_buffer()
    }

    pub fn shadow_map(&self) -> &ShadowMap {
        &self.shadow
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        self.framebuffer.resize(width, height);
    }

    /// Reset the shadow depth buffer and enable shadow sampling for the
    /// color draws that follow.
    pub fn begin_shadow_pass(&mut self) {
        self.shadow.begin_pass();
    }

    /// Depth-only pass: rasterize the mesh into the shadow map from the
    /// viewpoint of a light at `light_pos` shining along `light_dir`.
    pub fn render_shadow_map(&mut self, mesh: &Mesh, light_pos: Vec3, light_dir: Vec3) {
        self.shadow.set_light(light_pos, light_dir);
        self.shadow.rasterize_depth(mesh);
    }

    /// Draw one mesh with the given shader: vertex stage, backface cull,
    /// homogeneous clip, fan triangulation and scan conversion with depth
    /// test. In wireframe mode the screen-space edges are drawn on top.
    pub fn render_mesh(&mut self, mesh: &Mesh, shader: &Shader) {
        let prepared = self.prepare_triangles(mesh, shader);
        if prepared.is_empty() {
            debug!("mesh produced no rasterizable triangles");
            return;
        }

        let sample_shadows = self.shadows_enabled && self.shadow.sampling_enabled();
        let shadow = if sample_shadows { Some(&self.shadow) } else { None };

        let parallel = prepared.len() >= PARALLEL_MIN_TRIANGLES
            && self.framebuffer.height >= PARALLEL_MIN_HEIGHT;
        let stripes = if parallel {
            rayon::current_num_threads().max(1) * 4
        } else {
            1
        };

        let mut slices = self.framebuffer.split_into_stripes(stripes);
        if parallel {
            slices.par_iter_mut().for_each(|slice| {
                for tri in &prepared {
                    tri.rasterize_into(slice, shader, shadow);
                }
            });
        } else {
            for slice in &mut slices {
                for tri in &prepared {
                    tri.rasterize_into(slice, shader, shadow);
                }
            }
        }
        drop(slices);

        if self.wireframe_mode {
            for tri in &prepared {
                let color = if tri.front_facing {
                    WIRE_FRONT_COLOR
                } else {
                    WIRE_BACK_COLOR
                };
                self.draw_triangle_edges(&tri.screen, color);
            }
        }
    }

    /// Run the front half of the pipeline for every mesh triangle and
    /// collect the surviving screen triangles.
    fn prepare_triangles(&self, mesh: &Mesh, shader: &Shader) -> Vec<ScreenTriangle> {
        let vertices = mesh.vertices();
        let triangles = mesh.triangles();
        let model = mesh.model_matrix();

        debug!(
            "rendering mesh: {} vertices, {} triangles",
            vertices.len(),
            triangles.len()
        );

        let sample_shadows = self.shadows_enabled && self.shadow.sampling_enabled();
        let shadow_matrix = sample_shadows.then(|| self.shadow.shadow_matrix());

        let mut prepared = Vec::with_capacity(triangles.len());

        for tri in triangles {
            let out1 = shader.vertex(&vertices[tri.v0 as usize], &model, shadow_matrix.as_ref());
            let out2 = shader.vertex(&vertices[tri.v1 as usize], &model, shadow_matrix.as_ref());
            let out3 = shader.vertex(&vertices[tri.v2 as usize], &model, shadow_matrix.as_ref());

            let centroid = (out1.world_pos + out2.world_pos + out3.world_pos) / 3.0;
            let view_dir = (shader.camera_pos - centroid).normalize_or_zero();

            let face_normal = (out2.world_pos - out1.world_pos)
                .cross(out3.world_pos - out1.world_pos)
                .normalize_or_zero();
            let avg_normal = (out1.normal + out2.normal + out3.normal).normalize_or_zero();

            let face_dot = face_normal.dot(view_dir);
            let best_dot = face_dot.max(avg_normal.dot(view_dir));

            if !self.wireframe_mode && best_dot < BACKFACE_DOT_THRESHOLD {
                trace!("triangle culled as back-facing");
                continue;
            }

            let polygon = clip_triangle(out1, out2, out3);
            if polygon.len() < 3 {
                trace!("triangle clipped out");
                continue;
            }

            let depth_bias = DEPTH_BIAS_SCALE * (1.0 - face_dot);
            let front_facing = face_dot > 0.0;

            let verts = polygon.vertices();
            for i in 1..verts.len() - 1 {
                if let Some(screen_tri) = self.project_triangle(
                    &verts[0],
                    &verts[i],
                    &verts[i + 1],
                    depth_bias,
                    front_facing,
                ) {
                    prepared.push(screen_tri);
                }
            }
        }

        prepared
    }

    /// Perspective divide, viewport mapping and barycentric setup for one
    /// clipped sub-triangle. Returns None when the divide is unsafe.
    fn project_triangle(
        &self,
        v1: &VertexOutput,
        v2: &VertexOutput,
        v3: &VertexOutput,
        depth_bias: f32,
        front_facing: bool,
    ) -> Option<ScreenTriangle> {
        let mut screen = [Vec2::ZERO; 3];
        let mut z = [0.0f32; 3];
        let mut inv_w = [0.0f32; 3];

        for (slot, v) in [v1, v2, v3].iter().enumerate() {
            let w = v.clip_pos.w;
            if w.abs() < MIN_CLIP_W {
                trace!("triangle dropped: clip w near zero");
                return None;
            }
            let mapped = self.framebuffer.viewport_transform(v.clip_pos / w);
            screen[slot] = Vec2::new(mapped.x, mapped.y);
            z[slot] = mapped.z;
            inv_w[slot] = 1.0 / w;
        }

        let min_x = (screen[0].x.min(screen[1].x).min(screen[2].x).floor() as i32).max(0);
        let max_x = (screen[0].x.max(screen[1].x).max(screen[2].x).ceil() as i32)
            .min(self.framebuffer.width as i32 - 1);
        let min_y = (screen[0].y.min(screen[1].y).min(screen[2].y).floor() as i32).max(0);
        let max_y = (screen[0].y.max(screen[1].y).max(screen[2].y).ceil() as i32)
            .min(self.framebuffer.height as i32 - 1);

        let edge0 = screen[1] - screen[0];
        let edge1 = screen[2] - screen[0];
        let d00 = edge0.dot(edge0);
        let d01 = edge0.dot(edge1);
        let d11 = edge1.dot(edge1);
        let denom = d00 * d11 - d01 * d01;

        let fillable = denom.abs() >= 1e-6 && min_x <= max_x && min_y <= max_y;
        let inv_denom = if fillable { 1.0 / denom } else { 0.0 };

        Some(ScreenTriangle {
            attrs: [*v1, *v2, *v3],
            screen,
            z,
            inv_w,
            min_x,
            max_x,
            min_y,
            max_y,
            edge0,
            edge1,
            d00,
            d01,
            d11,
            inv_denom,
            depth_bias,
            fillable,
            front_facing,
        })
    }

    fn draw_triangle_edges(&mut self, screen: &[Vec2; 3], color: Color) {
        let [a, b, c] = screen.map(|p| (p.x as i32, p.y as i32));
        self.draw_line(a.0, a.1, b.0, b.1, color);
        self.draw_line(b.0, b.1, c.0, c.1, color);
        self.draw_line(c.0, c.1, a.0, a.1, color);
    }

    /// Bresenham line into the color buffer, ignoring depth.
    pub fn draw_line(&mut self, mut x1: i32, mut y1: i32, x2: i32, y2: i32, color: Color) {
        let packed = color.to_u32();
        let dx = (x2 - x1).abs();
        let dy = (y2 - y1).abs();
        let sx = if x1 < x2 { 1 } else { -1 };
        let sy = if y1 < y2 { 1 } else { -1 };
        let mut err = dx - dy;

        loop {
            if x1 >= 0 && y1 >= 0 {
                self.framebuffer
                    .set_pixel_no_depth(x1 as usize, y1 as usize, packed);
            }

            if x1 == x2 && y1 == y2 {
                break;
            }

            let e2 = 2 * err;
            if e2 > -dy {
                err -= dy;
                x1 += sx;
            }
            if e2 < dx {
                err += dx;
                y1 += sy;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Mesh, Triangle, Vertex};
    use crate::rendering::shader::Material;
    use glam::Vec2;

    fn ndc_triangle(positions: [Vec3; 3], color: Color) -> Mesh {
        let vertices = positions
            .iter()
            .map(|&p| Vertex {
                position: p,
                normal: Vec3::Z,
                tex_coord: Vec2::ZERO,
                color,
            })
            .collect();
        Mesh::from_parts(vertices, vec![Triangle::new(0, 1, 2)])
    }

    #[test]
    fn triangle_crossing_near_plane_still_draws() {
        let mut rasterizer = Rasterizer::new(16, 16);
        let mut shader = Shader::new(Material::Flat);
        shader.camera_pos = Vec3::new(0.0, 0.0, 5.0);
        shader.projection =
            glam::Mat4::perspective_rh_gl(1.0, 1.0, 0.1, 100.0);

        // Spans from well in front of the camera to behind the near plane.
        let mesh = ndc_triangle(
            [
                Vec3::new(-1.0, -1.0, -5.0),
                Vec3::new(1.0, -1.0, -5.0),
                Vec3::new(0.0, 1.0, -0.05),
            ],
            Color::rgb(255, 0, 0),
        );

        rasterizer.clear(Color::BLACK);
        rasterizer.render_mesh(&mesh, &shader);

        let drawn = rasterizer
            .color_buffer()
            .iter()
            .filter(|&&c| c != Color::BLACK.to_u32())
            .count();
        assert!(drawn > 0, "clipped triangle should still rasterize pixels");
        assert!(rasterizer.depth_buffer().iter().all(|d| d.is_finite()));
    }

    #[test]
    fn degenerate_triangle_is_skipped() {
        let mut rasterizer = Rasterizer::new(8, 8);
        let shader = Shader::new(Material::Flat);

        // All three vertices on one line.
        let mesh = ndc_triangle(
            [
                Vec3::new(-0.5, 0.0, 0.0),
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.5, 0.0, 0.0),
            ],
            Color::WHITE,
        );

        rasterizer.clear(Color::BLACK);
        rasterizer.render_mesh(&mesh, &shader);
        assert!(rasterizer
            .color_buffer()
            .iter()
            .all(|&c| c == Color::BLACK.to_u32()));
    }
}
