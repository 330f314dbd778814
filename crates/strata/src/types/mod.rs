//! Concrete value types held by the scene value model.
//!
//! Geometry carriers (vectors, quaternions, matrices, half-precision floats)
//! live in [`algebra`] and [`half`]; scene-description carriers (asset paths,
//! references, payloads, layer offsets) live in [`scene`].

mod algebra;
mod half;
mod scene;

pub use algebra::{Matrix2d, Matrix3d, Matrix4d, Quat, Quatd, Quatf, Quath, Vec2, Vec2d, Vec2f, Vec2h, Vec2i, Vec3,
    Vec3d, Vec3f, Vec3h, Vec3i, Vec4, Vec4d, Vec4f, Vec4h, Vec4i};
pub use half::Half;
pub use scene::{AssetPath, LayerOffset, OpaqueValue, Payload, Permission, Reference, Specifier, TimeCode,
    UnregisteredValue, Variability};
