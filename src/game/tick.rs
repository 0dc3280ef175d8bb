//! Authoritative Simulation Tick
//!
//! Runs once per fixed tick on the authoritative process only. Each entity
//! consumes its pending input exactly once, then integrates velocity with a
//! step kinematic move against the ground.

use serde::{Serialize, Deserialize};

use crate::core::vec3::Vec3;
use crate::game::state::{EntityState, World};

/// Distance under which an entity moving down snaps onto the ground.
pub const GROUND_SNAP: f32 = 0.01;

/// Movement tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    /// Horizontal speed at full input (units/s)
    pub move_speed: f32,
    /// Upward velocity applied on jump (units/s)
    pub jump_velocity: f32,
    /// Downward acceleration while airborne (units/s²)
    pub gravity: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            jump_velocity: 4.5,
            gravity: 9.8,
        }
    }
}

/// Ground surface the kinematic move lands on.
///
/// Level geometry is outside this crate; this is its boundary.
pub trait Ground {
    /// Height of the walkable surface at world (x, z).
    fn height_at(&self, x: f32, z: f32) -> f32;
}

/// Infinite horizontal plane.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlatGround {
    /// Plane height
    pub height: f32,
}

impl Ground for FlatGround {
    fn height_at(&self, _x: f32, _z: f32) -> f32 {
        self.height
    }
}

/// Result of a tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickResult {
    /// Tick number just simulated
    pub tick: u32,
    /// Entities that jumped this tick
    pub jumps: u32,
}

/// Run one simulation tick over every entity.
pub fn simulate(
    world: &mut World,
    config: &MovementConfig,
    ground: &dyn Ground,
    dt: f32,
) -> TickResult {
    let mut result = TickResult {
        tick: world.advance_tick(),
        jumps: 0,
    };

    for entity in world.iter_mut() {
        if step_entity(entity, config, ground, dt) {
            result.jumps += 1;
        }

        #[cfg(feature = "debug-tracing")]
        tracing::trace!(
            tick = result.tick,
            entity = %entity.id,
            position = %entity.position,
            velocity = %entity.velocity,
            grounded = entity.grounded,
            "Entity stepped"
        );
    }

    result
}

/// Advance a single entity by `dt`. Returns true if it jumped.
///
/// Movement is a pure function of the pending input, the current yaw and the
/// grounded flag; the pending slot is reset afterwards.
pub fn step_entity(
    entity: &mut EntityState,
    config: &MovementConfig,
    ground: &dyn Ground,
    dt: f32,
) -> bool {
    let input = entity.pending.take();

    // Entity-local -> world, flattened onto the horizontal plane.
    let world_dir = input.direction.rotate_y(entity.yaw).horizontal();
    let mut velocity = Vec3::new(
        world_dir.x * config.move_speed,
        entity.velocity.y,
        world_dir.z * config.move_speed,
    );

    let jumped = entity.grounded && input.jump;
    if entity.grounded {
        velocity.y = if input.jump { config.jump_velocity } else { 0.0 };
    } else {
        velocity.y -= config.gravity * dt;
    }

    move_and_land(entity, velocity, ground, dt);
    jumped
}

/// Integrate position and resolve contact with the ground.
fn move_and_land(entity: &mut EntityState, mut velocity: Vec3, ground: &dyn Ground, dt: f32) {
    let mut next = entity.position + velocity * dt;
    let floor = ground.height_at(next.x, next.z);

    if velocity.y <= 0.0 && next.y <= floor + GROUND_SNAP {
        next.y = floor;
        velocity.y = 0.0;
        entity.grounded = true;
    } else if next.y < floor {
        // Stepped into rising ground while moving up: stand on it.
        next.y = floor;
        entity.grounded = false;
    } else {
        entity.grounded = false;
    }

    entity.position = next;
    entity.velocity = velocity;
}

// =============================================================================
// TESTS
// =============================================================================
