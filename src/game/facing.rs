//! Facing (yaw)
//!
//! The controlling client rotates its own view immediately and forwards the
//! raw delta. Only the authoritative yaw, updated from validated deltas, is
//! replicated to other observers.

use crate::core::angle::wrap_angle;
use crate::game::state::EntityState;

/// Default radians of yaw per pointer unit.
pub const DEFAULT_POINTER_SENSITIVITY: f32 = 0.003;

/// Client-side yaw prediction for the locally controlled entity.
#[derive(Clone, Debug)]
pub struct FacingPredictor {
    sensitivity: f32,
    predicted_yaw: f32,
}

impl FacingPredictor {
    /// Create a predictor with the given pointer sensitivity.
    pub fn new(sensitivity: f32) -> Self {
        Self {
            sensitivity,
            predicted_yaw: 0.0,
        }
    }

    /// Start predicting from a known yaw (e.g. the spawn yaw).
    pub fn seed(&mut self, yaw: f32) {
        self.predicted_yaw = wrap_angle(yaw);
    }

    /// Apply horizontal pointer motion locally.
    ///
    /// Returns the yaw delta to forward, or `None` when there is no rotation.
    /// Moving the pointer right turns right (negative yaw).
    pub fn pointer_motion(&mut self, dx: f32) -> Option<f32> {
        if !dx.is_finite() || dx == 0.0 {
            return None;
        }
        let delta = -dx * self.sensitivity;
        self.predicted_yaw = wrap_angle(self.predicted_yaw + delta);
        Some(delta)
    }

    /// Locally predicted yaw. Never authoritative.
    pub fn predicted_yaw(&self) -> f32 {
        self.predicted_yaw
    }
}

impl Default for FacingPredictor {
    fn default() -> Self {
        Self::new(DEFAULT_POINTER_SENSITIVITY)
    }
}

/// Apply a validated yaw delta to the authoritative facing.
pub fn apply_yaw_delta(entity: &mut EntityState, yaw_delta: f32) {
    entity.yaw = wrap_angle(entity.yaw + yaw_delta);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec3::Vec3;
    use crate::game::state::{EntityId, PeerId};
    use std::f32::consts::PI;

    #[test]
    fn test_pointer_right_turns_right() {
        let mut facing = FacingPredictor::new(0.01);
        let delta = facing.pointer_motion(10.0).unwrap();
        assert!(delta < 0.0);
        assert!((facing.predicted_yaw() - delta).abs() < 1.0e-6);
    }

    #[test]
    fn test_no_motion_sends_nothing() {
        let mut facing = FacingPredictor::default();
        assert_eq!(facing.pointer_motion(0.0), None);
        assert_eq!(facing.pointer_motion(f32::NAN), None);
    }

    #[test]
    fn test_apply_yaw_delta_wraps() {
        let mut entity = EntityState::new(EntityId(1), PeerId(2), Vec3::ZERO);
        entity.yaw = PI - 0.1;
        apply_yaw_delta(&mut entity, 0.3);
        assert!(entity.yaw < 0.0 && entity.yaw > -PI);
    }

    #[test]
    fn test_deltas_accumulate() {
        let mut entity = EntityState::new(EntityId(1), PeerId(2), Vec3::ZERO);
        for _ in 0..10 {
            apply_yaw_delta(&mut entity, 0.1);
        }
        assert!((entity.yaw - 1.0).abs() < 1.0e-5);
    }
}
