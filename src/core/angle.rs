//! Yaw angle helpers.

use std::f32::consts::{PI, TAU};

/// Wrap an angle in radians into `(-PI, PI]`.
///
/// Non-finite input is returned unchanged; callers reject it before this point.
pub fn wrap_angle(angle: f32) -> f32 {
    if !angle.is_finite() {
        return angle;
    }
    let mut wrapped = angle.rem_euclid(TAU);
    if wrapped > PI {
        wrapped -= TAU;
    }
    wrapped
}
