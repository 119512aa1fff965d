/// Indexed triangle meshes: the geometry source the pipeline consumes.
/// Builders for the common primitives plus a small OBJ loader.
use std::f32::consts::PI;
use std::fs;
use std::path::Path;

use glam::{Mat4, Vec2, Vec3};
use log::info;
use thiserror::Error;

use crate::rendering::Color;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("failed to read OBJ file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed OBJ data at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("face references vertex {index} but only {count} exist")]
    IndexOutOfRange { index: usize, count: usize },
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
    pub color: Color,
}

/// Three zero-based indices into the vertex array.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Triangle {
    pub v0: u32,
    pub v1: u32,
    pub v2: u32,
}

impl Triangle {
    pub const fn new(v0: u32, v1: u32, v2: u32) -> Self {
        Self { v0, v1, v2 }
    }
}

pub struct Mesh {
    vertices: Vec<Vertex>,
    triangles: Vec<Triangle>,
    model: Mat4,
}

impl Mesh {
    /// Build a mesh from raw parts. Index validity is a mesh invariant:
    /// out-of-range indices are a programmer error and panic here rather
    /// than deep inside the pipeline.
    pub fn from_parts(vertices: Vec<Vertex>, triangles: Vec<Triangle>) -> Self {
        let count = vertices.len() as u32;
        for tri in &triangles {
            assert!(
                tri.v0 < count && tri.v1 < count && tri.v2 < count,
                "triangle index out of range"
            );
        }
        Self {
            vertices,
            triangles,
            model: Mat4::IDENTITY,
        }
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.model
    }

    pub fn set_model_matrix(&mut self, model: Mat4) {
        self.model = model;
    }

    /// Unit cube centered on the origin, 4 vertices per face so each face
    /// keeps its own flat normal.
    pub fn cube(color: Color) -> Self {
        let corners = [
            Vec3::new(-0.5, -0.5, -0.5),
            Vec3::new(0.5, -0.5, -0.5),
            Vec3::new(0.5, 0.5, -0.5),
            Vec3::new(-0.5, 0.5, -0.5),
            Vec3::new(-0.5, -0.5, 0.5),
            Vec3::new(0.5, -0.5, 0.5),
            Vec3::new(0.5, 0.5, 0.5),
            Vec3::new(-0.5, 0.5, 0.5),
        ];

        let faces: [([usize; 4], Vec3); 6] = [
            ([0, 1, 2, 3], Vec3::NEG_Z),
            ([4, 7, 6, 5], Vec3::Z),
            ([1, 5, 6, 2], Vec3::X),
            ([0, 3, 7, 4], Vec3::NEG_X),
            ([3, 2, 6, 7], Vec3::Y),
            ([0, 4, 5, 1], Vec3::NEG_Y),
        ];

        let uvs = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut triangles = Vec::with_capacity(12);

        for (corner_ids, normal) in faces {
            let base = vertices.len() as u32;
            for (slot, &corner) in corner_ids.iter().enumerate() {
                vertices.push(Vertex {
                    position: corners[corner],
                    normal,
                    tex_coord: uvs[slot],
                    color,
                });
            }
            triangles.push(Triangle::new(base, base + 1, base + 2));
            triangles.push(Triangle::new(base, base + 2, base + 3));
        }

        Self::from_parts(vertices, triangles)
    }

    /// Latitude/longitude sphere of radius 0.5 centered on the origin.
    pub fn sphere(slices: u32, stacks: u32, color: Color) -> Self {
        let radius = 0.5;
        let mut vertices = Vec::with_capacity(((slices + 1) * (stacks + 1)) as usize);
        let mut triangles = Vec::with_capacity((slices * stacks * 2) as usize);

        for stack in 0..=stacks {
            let phi = PI * stack as f32 / stacks as f32;
            let (sin_phi, cos_phi) = phi.sin_cos();

            for slice in 0..=slices {
                let theta = 2.0 * PI * slice as f32 / slices as f32;
                let (sin_theta, cos_theta) = theta.sin_cos();

                let dir = Vec3::new(cos_theta * sin_phi, cos_phi, sin_theta * sin_phi);
                vertices.push(Vertex {
                    position: dir * radius,
                    normal: dir.normalize(),
                    tex_coord: Vec2::new(
                        slice as f32 / slices as f32,
                        stack as f32 / stacks as f32,
                    ),
                    color,
                });
            }
        }

        for stack in 0..stacks {
            for slice in 0..slices {
                let top_left = stack * (slices + 1) + slice;
                let top_right = top_left + 1;
                let bottom_left = (stack + 1) * (slices + 1) + slice;
                let bottom_right = bottom_left + 1;

                triangles.push(Triangle::new(top_left, bottom_left, top_right));
                triangles.push(Triangle::new(top_right, bottom_left, bottom_right));
            }
        }

        Self::from_parts(vertices, triangles)
    }

    /// Flat quad in the XZ plane with a +Y normal.
    pub fn plane(width: f32, depth: f32, color: Color) -> Self {
        let hw = width * 0.5;
        let hd = depth * 0.5;

        let positions = [
            Vec3::new(-hw, 0.0, -hd),
            Vec3::new(-hw, 0.0, hd),
            Vec3::new(hw, 0.0, hd),
            Vec3::new(hw, 0.0, -hd),
        ];
        let uvs = [
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
        ];

        let vertices = positions
            .iter()
            .zip(uvs)
            .map(|(&position, tex_coord)| Vertex {
                position,
                normal: Vec3::Y,
                tex_coord,
                color,
            })
            .collect();

        Self::from_parts(vertices, vec![Triangle::new(0, 1, 2), Triangle::new(0, 2, 3)])
    }

    /// Load a triangulated mesh from a Wavefront OBJ file. Faces with more
    /// than three corners are fan-triangulated; missing normals are
    /// regenerated afterwards.
    pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<Self, MeshError> {
        let text = fs::read_to_string(path.as_ref())?;

        let mut positions: Vec<Vec3> = Vec::new();
        let mut normals: Vec<Vec3> = Vec::new();
        let mut tex_coords: Vec<Vec2> = Vec::new();

        let mut vertices: Vec<Vertex> = Vec::new();
        let mut triangles: Vec<Triangle> = Vec::new();

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let mut tokens = line.split_whitespace();

            match tokens.next() {
                Some("v") => positions.push(parse_vec3(&mut tokens, line_no)?),
                Some("vn") => normals.push(parse_vec3(&mut tokens, line_no)?),
                Some("vt") => {
                    let x = parse_float(tokens.next(), line_no)?;
                    let y = parse_float(tokens.next(), line_no)?;
                    tex_coords.push(Vec2::new(x, y));
                }
                Some("f") => {
                    let mut corners = Vec::new();
                    for token in tokens {
                        corners.push(parse_face_corner(
                            token,
                            line_no,
                            &positions,
                            &tex_coords,
                            &normals,
                        )?);
                    }
                    if corners.len() < 3 {
                        return Err(MeshError::Parse {
                            line: line_no + 1,
                            message: "face with fewer than 3 corners".into(),
                        });
                    }
                    for i in 2..corners.len() {
                        let base = vertices.len() as u32;
                        vertices.push(corners[0]);
                        vertices.push(corners[i - 1]);
                        vertices.push(corners[i]);
                        triangles.push(Triangle::new(base, base + 1, base + 2));
                    }
                }
                _ => {}
            }
        }

        let mut mesh = Self::from_parts(vertices, triangles);
        if normals.is_empty() {
            mesh.generate_normals();
        }

        info!(
            "loaded OBJ mesh: {} vertices, {} triangles",
            mesh.vertices.len(),
            mesh.triangles.len()
        );
        Ok(mesh)
    }

    /// Recompute vertex normals by accumulating face normals. Face normals
    /// are area-weighted through the unnormalized cross product.
    pub fn generate_normals(&mut self) {
        for vertex in &mut self.vertices {
            vertex.normal = Vec3::ZERO;
        }

        for tri in &self.triangles {
            let p0 = self.vertices[tri.v0 as usize].position;
            let p1 = self.vertices[tri.v1 as usize].position;
            let p2 = self.vertices[tri.v2 as usize].position;
            let face_normal = (p1 - p0).cross(p2 - p0);

            for index in [tri.v0, tri.v1, tri.v2] {
                self.vertices[index as usize].normal += face_normal;
            }
        }

        for vertex in &mut self.vertices {
            vertex.normal = vertex.normal.normalize_or_zero();
        }
    }
}

fn parse_float(token: Option<&str>, line_no: usize) -> Result<f32, MeshError> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| MeshError::Parse {
            line: line_no + 1,
            message: "expected a float".into(),
        })
}

fn parse_vec3<'a, I: Iterator<Item = &'a str>>(
    tokens: &mut I,
    line_no: usize,
) -> Result<Vec3, MeshError> {
    let x = parse_float(tokens.next(), line_no)?;
    let y = parse_float(tokens.next(), line_no)?;
    let z = parse_float(tokens.next(), line_no)?;
    Ok(Vec3::new(x, y, z))
}

/// Resolve one `f` corner token: `v`, `v/vt`, `v//vn` or `v/vt/vn`,
/// 1-based indices.
fn parse_face_corner(
    token: &str,
    line_no: usize,
    positions: &[Vec3],
    tex_coords: &[Vec2],
    normals: &[Vec3],
) -> Result<Vertex, MeshError> {
    let mut parts = token.split('/');

    let position_index = parts
        .next()
        .and_then(|t| t.parse::<usize>().ok())
        .and_then(|i| i.checked_sub(1))
        .ok_or_else(|| MeshError::Parse {
            line: line_no + 1,
            message: format!("bad face corner '{token}'"),
        })?;
    let position = *positions
        .get(position_index)
        .ok_or(MeshError::IndexOutOfRange {
            index: position_index,
            count: positions.len(),
        })?;

    let tex_coord = parts
        .next()
        .filter(|t| !t.is_empty())
        .and_then(|t| t.parse::<usize>().ok())
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| tex_coords.get(i).copied())
        .unwrap_or(Vec2::ZERO);

    let normal = parts
        .next()
        .filter(|t| !t.is_empty())
        .and_then(|t| t.parse::<usize>().ok())
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| normals.get(i).copied())
        .unwrap_or(Vec3::ZERO);

    Ok(Vertex {
        position,
        normal,
        tex_coord,
        color: Color::WHITE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_one_normal_per_face() {
        let cube = Mesh::cube(Color::WHITE);
        assert_eq!(cube.vertices().len(), 24);
        assert_eq!(cube.triangles().len(), 12);
        for vertex in cube.vertices() {
            assert!((vertex.normal.length() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn sphere_normals_point_outward() {
        let sphere = Mesh::sphere(16, 16, Color::WHITE);
        for vertex in sphere.vertices() {
            let outward = vertex.position.normalize();
            assert!(outward.dot(vertex.normal) > 0.99);
        }
    }

    #[test]
    fn sphere_positions_sit_on_the_radius() {
        let sphere = Mesh::sphere(8, 8, Color::WHITE);
        for vertex in sphere.vertices() {
            assert!((vertex.position.length() - 0.5).abs() < 1e-5);
        }
    }

    #[test]
    #[should_panic(expected = "triangle index out of range")]
    fn out_of_range_index_panics() {
        let vertices = vec![Vertex::default(); 2];
        Mesh::from_parts(vertices, vec![Triangle::new(0, 1, 2)]);
    }

    #[test]
    fn generated_normals_match_flat_faces() {
        let mut mesh = Mesh::from_parts(
            vec![
                Vertex {
                    position: Vec3::new(0.0, 0.0, 0.0),
                    ..Default::default()
                },
                Vertex {
                    position: Vec3::new(1.0, 0.0, 0.0),
                    ..Default::default()
                },
                Vertex {
                    position: Vec3::new(0.0, 1.0, 0.0),
                    ..Default::default()
                },
            ],
            vec![Triangle::new(0, 1, 2)],
        );
        mesh.generate_normals();
        for vertex in mesh.vertices() {
            assert!((vertex.normal - Vec3::Z).length() < 1e-6);
        }
    }
}
