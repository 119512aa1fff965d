/// Shadow mapping: a square depth-only raster rendered from the light's
/// viewpoint, sampled at shading time with percentage-closer filtering.
use glam::{Mat4, Vec2, Vec3, Vec4};
use log::debug;

use crate::mesh::Mesh;

/// Side length of the square shadow depth buffer.
pub const SHADOW_MAP_SIZE: usize = 2048;

/// Half-extent of the orthographic light frustum.
const LIGHT_ORTHO_EXTENT: f32 = 10.0;
const LIGHT_NEAR: f32 = 0.1;
const LIGHT_FAR: f32 = 50.0;

/// PCF kernel radius: (2k+1)^2 taps.
const PCF_RADIUS: i32 = 3;
/// Depth bias applied before the occlusion comparison.
const PCF_DEPTH_BIAS: f32 = 1e-2;
/// How dark a fully occluded fragment gets: factor = 1 - r * DARKNESS.
const SHADOW_DARKNESS: f32 = 0.85;

pub struct ShadowMap {
    size: usize,
    depth: Vec<f32>,
    light_view: Mat4,
    light_projection: Mat4,
    shadow_matrix: Mat4,
    sampling_enabled: bool,
}

impl ShadowMap {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "shadow map must be non-empty");
        Self {
            size,
            depth: vec![1.0; size * size],
            light_view: Mat4::IDENTITY,
            light_projection: Mat4::IDENTITY,
            shadow_matrix: Mat4::IDENTITY,
            sampling_enabled: false,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Reset the depth buffer to the far sentinel and enable sampling for
    /// subsequent color draws.
    pub fn begin_pass(&mut self) {
        self.depth.fill(1.0);
        self.sampling_enabled = true;
    }

    pub fn sampling_enabled(&self) -> bool {
        self.sampling_enabled
    }

    pub fn set_sampling_enabled(&mut self, enabled: bool) {
        self.sampling_enabled = enabled;
    }

    /// Rebuild the light matrices for a light at `position` shining along
    /// `direction`.
    pub fn set_light(&mut self, position: Vec3, direction: Vec3) {
        let dir = direction.normalize();
        // A near-vertical light would be parallel to the usual up vector.
        let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };

        self.light_view = Mat4::look_at_rh(position, position + dir, up);
        self.light_projection = Mat4::orthographic_rh_gl(
            -LIGHT_ORTHO_EXTENT,
            LIGHT_ORTHO_EXTENT,
            -LIGHT_ORTHO_EXTENT,
            LIGHT_ORTHO_EXTENT,
            LIGHT_NEAR,
            LIGHT_FAR,
        );
        self.shadow_matrix = self.light_projection * self.light_view;
    }

    /// Light projection * view, the transform the vertex stage applies to
    /// world positions when shadows are enabled.
    pub fn shadow_matrix(&self) -> Mat4 {
        self.shadow_matrix
    }

    pub fn depth_buffer(&self) -> &[f32] {
        &self.depth
    }

    /// Depth-only rasterization of one mesh into the shadow map. No
    /// fragment shading, no polygon clipping: over-draw outside the map is
    /// bounded by the bounding-box clamp.
    pub fn rasterize_depth(&mut self, mesh: &Mesh) {
        let model = mesh.model_matrix();
        let vertices = mesh.vertices();
        let size_f = self.size as f32;

        let mut skipped = 0usize;

        for tri in mesh.triangles() {
            let mut screen = [Vec2::ZERO; 3];
            let mut depths = [0.0f32; 3];
            let mut degenerate = false;

            for (slot, &index) in [tri.v0, tri.v1, tri.v2].iter().enumerate() {
                let world = model * vertices[index as usize].position.extend(1.0);
                let clip = self.shadow_matrix * world;
                if clip.w.abs() < 1e-6 {
                    degenerate = true;
                    break;
                }
                let ndc = clip / clip.w;
                screen[slot] = Vec2::new(
                    (ndc.x + 1.0) * 0.5 * size_f,
                    (1.0 - ndc.y) * 0.5 * size_f,
                );
                depths[slot] = (ndc.z + 1.0) * 0.5;
            }

            if degenerate {
                skipped += 1;
                continue;
            }

            if !self.fill_depth_triangle(screen, depths) {
                skipped += 1;
            }
        }

        if skipped > 0 {
            debug!("shadow pass skipped {} degenerate triangles", skipped);
        }
    }

    /// Scan-convert one triangle in shadow-map space, writing
    /// min(existing, interpolated depth). Linear depth interpolation is
    /// exact for the orthographic light projection.
    fn fill_depth_triangle(&mut self, screen: [Vec2; 3], depths: [f32; 3]) -> bool {
        let [a, b, c] = screen;

        let min_x = (a.x.min(b.x).min(c.x).floor() as i32).max(0);
        let max_x = (a.x.max(b.x).max(c.x).ceil() as i32).min(self.size as i32 - 1);
        let min_y = (a.y.min(b.y).min(c.y).floor() as i32).max(0);
        let max_y = (a.y.max(b.y).max(c.y).ceil() as i32).min(self.size as i32 - 1);

        if min_x > max_x || min_y > max_y {
            return false;
        }

        let v0 = b - a;
        let v1 = c - a;
        let d00 = v0.dot(v0);
        let d01 = v0.dot(v1);
        let d11 = v1.dot(v1);
        let denom = d00 * d11 - d01 * d01;
        if denom.abs() < 1e-6 {
            return false;
        }
        let inv_denom = 1.0 / denom;

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let v2 = p - a;
                let d20 = v2.dot(v0);
                let d21 = v2.dot(v1);

                let beta = (d11 * d20 - d01 * d21) * inv_denom;
                let gamma = (d00 * d21 - d01 * d20) * inv_denom;
                let alpha = 1.0 - beta - gamma;

                if alpha >= 0.0 && beta >= 0.0 && gamma >= 0.0 {
                    let depth = alpha * depths[0] + beta * depths[1] + gamma * depths[2];
                    let index = y as usize * self.size + x as usize;
                    if depth < self.depth[index] {
                        self.depth[index] = depth;
                    }
                }
            }
        }

        true
    }

    /// PCF shadow lookup for a fragment already transformed to light clip
    /// space (the interpolated `shadow_pos` record field). Returns the
    /// shadow factor in [0.15, 1.0]; 1.0 means fully lit.
    pub fn sample(&self, light_clip: Vec4) -> f32 {
        if light_clip.w.abs() < 1e-4 {
            return 1.0;
        }

        let ndc = light_clip / light_clip.w;
        let u = (ndc.x + 1.0) * 0.5;
        let v = (1.0 - ndc.y) * 0.5;
        let z = (ndc.z + 1.0) * 0.5;

        // Outside the light's region: unshadowed.
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) || z > 1.0 {
            return 1.0;
        }

        let size = self.size as i32;
        let center_x = (u * (self.size - 1) as f32) as i32;
        let center_y = (v * (self.size - 1) as f32) as i32;

        let mut total = 0u32;
        let mut occluded = 0u32;

        for dy in -PCF_RADIUS..=PCF_RADIUS {
            for dx in -PCF_RADIUS..=PCF_RADIUS {
                let sx = center_x + dx;
                let sy = center_y + dy;
                if sx < 0 || sx >= size || sy < 0 || sy >= size {
                    continue;
                }
                total += 1;
                let stored = self.depth[sy as usize * self.size + sx as usize];
                if z - PCF_DEPTH_BIAS > stored {
                    occluded += 1;
                }
            }
        }

        if total == 0 || occluded == 0 {
            return 1.0;
        }

        let ratio = occluded as f32 / total as f32;
        let factor = 1.0 - ratio * SHADOW_DARKNESS;
        // Hard-penumbra step: any occlusion caps the factor at 0.5.
        factor.min(0.5)
    }

    /// Shadow factor for a world-space position.
    pub fn factor_at(&self, world_pos: Vec3) -> f32 {
        self.sample(self.shadow_matrix * world_pos.extend(1.0))
    }
}
