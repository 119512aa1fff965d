/// Polyshade - CPU software rasterizer
/// Indexed triangle meshes in, shaded pixels out: programmable vertex and
/// fragment stages, homogeneous clipping, z-buffering and PCF shadows.
pub mod camera;
pub mod mesh;
pub mod rendering;

pub use camera::Camera;
pub use mesh::{Mesh, MeshError, Triangle, Vertex};
pub use rendering::{
    Color, Framebuffer, Light, LightKind, Material, PhongParams, Rasterizer, Shader, ShadowMap,
    ToonParams, SHADOW_MAP_SIZE,
};
