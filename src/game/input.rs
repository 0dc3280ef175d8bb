//! Input Capture and Normalization
//!
//! Client side: turns held buttons into a normalized entity-local direction
//! plus a jump edge. Server side: sanitizes untrusted move requests and keeps
//! the single pending-input slot each entity consumes once per tick.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::vec3::{Vec3, EPSILON};

// =============================================================================
// BUTTONS (client capture boundary)
// =============================================================================

/// Held movement buttons for a single sample.
///
/// Filled in by the input-capture layer; this crate never reads devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputButtons {
    /// Packed bits:
    /// - Bit 0: forward
    /// - Bit 1: back
    /// - Bit 2: left
    /// - Bit 3: right
    /// - Bit 4: jump
    pub flags: u8,
}

impl InputButtons {
    /// Forward button bit
    pub const FORWARD: u8 = 0x01;
    /// Back button bit
    pub const BACK: u8 = 0x02;
    /// Left button bit
    pub const LEFT: u8 = 0x04;
    /// Right button bit
    pub const RIGHT: u8 = 0x08;
    /// Jump button bit
    pub const JUMP: u8 = 0x10;

    /// Nothing held.
    pub const fn none() -> Self {
        Self { flags: 0 }
    }

    /// Create from raw bits.
    pub const fn from_bits(flags: u8) -> Self {
        Self { flags }
    }

    /// Builder-style press.
    pub const fn with(self, bit: u8) -> Self {
        Self { flags: self.flags | bit }
    }

    /// Check if a button bit is held.
    #[inline]
    pub fn pressed(&self, bit: u8) -> bool {
        self.flags & bit != 0
    }

    /// Set or clear a button bit.
    #[inline]
    pub fn set(&mut self, bit: u8, pressed: bool) {
        if pressed {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    /// Entity-local direction from the held buttons, normalized.
    ///
    /// Right is +X, forward is -Z. Opposite buttons cancel.
    pub fn direction(&self) -> Vec3 {
        let axis = |pos: bool, neg: bool| (pos as i8 - neg as i8) as f32;
        let x = axis(self.pressed(Self::RIGHT), self.pressed(Self::LEFT));
        let z = axis(self.pressed(Self::BACK), self.pressed(Self::FORWARD));
        Vec3::new(x, 0.0, z).normalize_or_zero()
    }
}

// =============================================================================
// PENDING INPUT (server slot)
// =============================================================================

/// Latest accepted input for one entity.
///
/// Single slot: a newer accepted request overwrites it, the tick consumes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingInput {
    /// Unit or zero vector in entity-local axes
    pub direction: Vec3,
    /// Jump requested for the next tick
    pub jump: bool,
}

impl PendingInput {
    /// Idle input.
    pub const IDLE: Self = Self { direction: Vec3::ZERO, jump: false };

    /// Create a new pending input.
    pub const fn new(direction: Vec3, jump: bool) -> Self {
        Self { direction, jump }
    }

    /// True if this input would not change anything worth sending.
    #[inline]
    pub fn is_trivial(&self) -> bool {
        self.direction.is_zero() && !self.jump
    }

    /// Return the current value and reset the slot to idle.
    #[inline]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

// =============================================================================
// CLIENT SAMPLER
// =============================================================================

/// Builds move requests from button samples, one sample per client tick.
#[derive(Clone, Debug, Default)]
pub struct InputSampler {
    jump_was_held: bool,
}

impl InputSampler {
    /// Create a sampler with jump released.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample the buttons for this tick.
    ///
    /// Jump is reported only on the released-to-pressed edge.
    pub fn sample(&mut self, buttons: InputButtons) -> PendingInput {
        let jump_held = buttons.pressed(InputButtons::JUMP);
        let jump = jump_held && !self.jump_was_held;
        self.jump_was_held = jump_held;

        PendingInput {
            direction: buttons.direction(),
            jump,
        }
    }

    /// Sample and return the input only if it is worth sending.
    pub fn sample_for_send(&mut self, buttons: InputButtons) -> Option<PendingInput> {
        let input = self.sample(buttons);
        (!input.is_trivial()).then_some(input)
    }

    /// Forget the jump state (e.g. after losing control of the entity).
    pub fn reset(&mut self) {
        self.jump_was_held = false;
    }
}

// =============================================================================
// SERVER VALIDATION
// =============================================================================

/// Outcome of sanitizing an untrusted move request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MoveValidation {
    /// Request accepted as sent.
    Accepted(PendingInput),
    /// Direction was longer than one and got clamped to unit length.
    AcceptedWithClamp(PendingInput),
    /// Dropped: NaN or Inf in the direction.
    DroppedNonFinite,
}

impl MoveValidation {
    /// The accepted input, if any.
    pub fn accepted(self) -> Option<PendingInput> {
        match self {
            Self::Accepted(input) | Self::AcceptedWithClamp(input) => Some(input),
            Self::DroppedNonFinite => None,
        }
    }
}

/// Sanitize a move request's payload.
///
/// Only checks shape; authority is checked separately against the sender.
pub fn validate_move(direction: [f32; 3], jump: bool) -> MoveValidation {
    let direction = Vec3::from_array(direction);
    if !direction.is_finite() {
        return MoveValidation::DroppedNonFinite;
    }

    let len_sq = direction.length_squared();
    if len_sq > 1.0 + EPSILON.sqrt() {
        debug!(length = len_sq.sqrt(), "Clamping oversized move direction");
        return MoveValidation::AcceptedWithClamp(PendingInput::new(
            direction.normalize_or_zero(),
            jump,
        ));
    }

    MoveValidation::Accepted(PendingInput::new(direction, jump))
}

/// Sanitize a yaw delta. Returns `None` for non-finite values.
pub fn validate_yaw_delta(yaw_delta: f32) -> Option<f32> {
    yaw_delta.is_finite().then_some(yaw_delta)
}

// =============================================================================
// TESTS
// =============================================================================
