//! Core math primitives.
//!
//! Plain value types shared by the simulation and the wire protocol.

pub mod angle;
pub mod vec3;

// Re-export core types
pub use angle::wrap_angle;
pub use vec3::Vec3;
