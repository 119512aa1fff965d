/// Software rasterization pipeline: framebuffer, homogeneous clipper,
/// perspective-correct scan conversion, shadow mapping and the
/// programmable shader stages.
pub mod clipper;
pub mod color;
pub mod framebuffer;
pub mod rasterizer;
pub mod shader;
pub mod shadow;

pub use clipper::{clip_triangle, ClippedPolygon, MAX_CLIPPED_VERTS};
pub use color::Color;
pub use framebuffer::{Framebuffer, FrameSlice};
pub use rasterizer::Rasterizer;
pub use shader::{
    FragmentInput, Light, LightKind, Material, PhongParams, Shader, ToonParams, VertexOutput,
    MAX_LIGHTS,
};
pub use shadow::{ShadowMap, SHADOW_MAP_SIZE};
