/// Sutherland-Hodgman polygon clipping in homogeneous clip space.
///
/// A triangle is clipped against the six frustum half-spaces in turn,
/// replacing the polygon after each plane. The near plane (z >= -w) must be
/// clipped before the perspective divide or w crosses zero under the divide.
use glam::Vec4;

use super::shader::VertexOutput;

/// A triangle clipped against six planes gains at most one vertex per plane.
pub const MAX_CLIPPED_VERTS: usize = 9;

/// Convex output polygon of a clip, fully inside the clip volume.
/// Fewer than 3 vertices means the triangle was clipped away.
#[derive(Copy, Clone)]
pub struct ClippedPolygon {
    verts: [VertexOutput; MAX_CLIPPED_VERTS],
    len: usize,
}

impl ClippedPolygon {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn vertices(&self) -> &[VertexOutput] {
        &self.verts[..self.len]
    }
}

/// The six clip-space half-spaces: x <= w, -x <= w, y <= w, -y <= w,
/// z <= w, z >= -w.
const PLANE_COUNT: usize = 6;

/// Signed boundary function for one plane; a vertex is inside iff
/// the value is >= 0.
#[inline]
fn boundary(p: Vec4, plane: usize) -> f32 {
    match plane {
        0 => p.w - p.x,
        1 => p.w + p.x,
        2 => p.w - p.y,
        3 => p.w + p.y,
        4 => p.w - p.z,
        _ => p.w + p.z,
    }
}

/// Clip one triangle of interpolant records against all six planes.
/// Intersection vertices carry the t-weighted blend of the full record,
/// not only the position.
pub fn clip_triangle(v1: VertexOutput, v2: VertexOutput, v3: VertexOutput) -> ClippedPolygon {
    let mut current = [VertexOutput::default(); MAX_CLIPPED_VERTS];
    let mut next = [VertexOutput::default(); MAX_CLIPPED_VERTS];

    current[0] = v1;
    current[1] = v2;
    current[2] = v3;
    let mut len = 3;

    for plane in 0..PLANE_COUNT {
        len = clip_against_plane(&current[..len], plane, &mut next);
        if len < 3 {
            return ClippedPolygon {
                verts: current,
                len: 0,
            };
        }
        std::mem::swap(&mut current, &mut next);
    }

    ClippedPolygon {
        verts: current,
        len,
    }
}

/// One Sutherland-Hodgman pass over an edge loop. Returns the number of
/// vertices written to `output`.
fn clip_against_plane(
    input: &[VertexOutput],
    plane: usize,
    output: &mut [VertexOutput; MAX_CLIPPED_VERTS],
) -> usize {
    let mut out_len = 0;
    let mut prev = &input[input.len() - 1];
    let mut prev_f = boundary(prev.clip_pos, plane);

    for curr in input {
        let curr_f = boundary(curr.clip_pos, plane);
        let prev_inside = prev_f >= 0.0;
        let curr_inside = curr_f >= 0.0;

        match (prev_inside, curr_inside) {
            (true, true) => {
                output[out_len] = *curr;
                out_len += 1;
            }
            (false, true) => {
                output[out_len] = intersect(prev, curr, prev_f, curr_f);
                out_len += 1;
                output[out_len] = *curr;
                out_len += 1;
            }
            (true, false) => {
                output[out_len] = intersect(prev, curr, prev_f, curr_f);
                out_len += 1;
            }
            (false, false) => {}
        }

        prev = curr;
        prev_f = curr_f;
    }

    out_len
}

/// Solve f(prev) + t * (f(curr) - f(prev)) = 0 and blend the full records.
#[inline]
fn intersect(prev: &VertexOutput, curr: &VertexOutput, prev_f: f32, curr_f: f32) -> VertexOutput {
    let t = (prev_f / (prev_f - curr_f)).clamp(0.0, 1.0);
    VertexOutput::lerp(prev, curr, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    use crate::rendering::Color;

    fn record(clip: Vec4) -> VertexOutput {
        VertexOutput {
            clip_pos: clip,
            world_pos: clip.truncate(),
            normal: Vec3::Z,
            tex_coord: Vec2::new(clip.x, clip.y),
            color: Color::WHITE,
            shadow_pos: Vec4::ZERO,
        }
    }

    #[test]
    fn fully_inside_triangle_is_untouched() {
        let a = record(Vec4::new(-0.5, -0.5, 0.0, 1.0));
        let b = record(Vec4::new(0.5, -0.5, 0.0, 1.0));
        let c = record(Vec4::new(0.0, 0.5, 0.0, 1.0));

        let clipped = clip_triangle(a, b, c);
        assert_eq!(clipped.len(), 3);
        for (out, orig) in clipped.vertices().iter().zip([a, b, c]) {
            assert!((out.clip_pos - orig.clip_pos).length() < 1e-6);
            assert!((out.tex_coord - orig.tex_coord).length() < 1e-6);
        }
    }

    #[test]
    fn fully_outside_triangle_is_removed() {
        let a = record(Vec4::new(2.0, 0.0, 0.0, 1.0));
        let b = record(Vec4::new(3.0, 0.0, 0.0, 1.0));
        let c = record(Vec4::new(2.5, 1.0, 0.0, 1.0));

        let clipped = clip_triangle(a, b, c);
        assert!(clipped.is_empty());
    }

    #[test]
    fn near_plane_cut_yields_quad() {
        // One vertex behind z = -w, two in front: the cut adds one vertex.
        let a = record(Vec4::new(-0.5, 0.0, 0.0, 1.0));
        let b = record(Vec4::new(0.5, 0.0, 0.0, 1.0));
        let c = record(Vec4::new(0.0, 0.5, -2.0, 1.0));

        let clipped = clip_triangle(a, b, c);
        assert_eq!(clipped.len(), 4);
        for v in clipped.vertices() {
            assert!(v.clip_pos.z >= -v.clip_pos.w - 1e-6);
        }
    }

    #[test]
    fn intersection_blends_attributes() {
        let mut a = record(Vec4::new(0.0, 0.0, 0.0, 1.0));
        let mut b = record(Vec4::new(0.0, 0.0, -2.0, 1.0));
        a.color = Color::rgb(0, 0, 0);
        b.color = Color::rgb(200, 200, 200);

        // Edge crosses z = -w at t = 0.5.
        let c = record(Vec4::new(0.5, 0.5, 0.0, 1.0));
        let clipped = clip_triangle(a, b, c);

        let cut = clipped
            .vertices()
            .iter()
            .find(|v| (v.clip_pos.z + v.clip_pos.w).abs() < 1e-5)
            .expect("cut vertex on the near plane");
        assert_eq!(cut.color.r, 100);
    }
}
