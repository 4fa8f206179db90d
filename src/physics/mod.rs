//! Deterministic fixed-step projectile simulators used purely for shadow
//! validation.

pub mod basketball;
pub mod penalty;
pub mod shadow;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fixed simulation step, 1/60 s.
pub const DT: f64 = 1.0 / 60.0;
pub const GRAVITY: f64 = 9.81;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    pub fn distance(&self, other: &Vec3) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Spin {
    pub side: f64,
    pub top: f64,
}

impl Default for Spin {
    fn default() -> Self {
        Spin { side: 0.0, top: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShotInput {
    pub start: Vec3,
    /// Horizontal angle, radians, measured from the goal/basket axis.
    pub horizontal_angle: f64,
    /// Vertical (elevation) angle, radians.
    pub vertical_angle: f64,
    /// Normalised power in `[0, 1]`.
    pub power: f64,
    pub spin: Spin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Goal,
    Saved,
    Miss,
    Score,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotResult {
    pub trajectory: Vec<Vec3>,
    pub final_position: Vec3,
    pub verdict: Verdict,
    pub hash: [u8; 32],
}

/// `H(match_id || shot_index || final_position || verdict)`.
pub fn shot_hash(match_id: Uuid, shot_index: u32, final_position: Vec3, verdict: Verdict) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(match_id.as_bytes());
    hasher.update(shot_index.to_le_bytes());
    hasher.update(final_position.x.to_le_bytes());
    hasher.update(final_position.y.to_le_bytes());
    hasher.update(final_position.z.to_le_bytes());
    hasher.update([verdict as u8]);
    hasher.finalize().into()
}

/// Applies one fixed-step integration: gravity, multiplicative air
/// resistance, and a simplified Magnus coupling from spin into lateral
/// (`x`) and vertical (`y`) acceleration.
pub(crate) fn integrate_step(position: Vec3, velocity: &mut Vec3, spin: Spin, drag: f64) {
    velocity.y -= GRAVITY * DT;
    // Magnus effect: side-spin deflects laterally, top-spin deflects
    // vertically, scaled by current forward speed.
    let forward_speed = velocity.z.abs().max(0.01);
    velocity.x += spin.side * forward_speed * 0.05 * DT;
    velocity.y += spin.top * forward_speed * 0.05 * DT;

    velocity.x *= 1.0 - drag;
    velocity.y *= 1.0 - drag;
    velocity.z *= 1.0 - drag;

    let _ = position;
}

pub(crate) fn step_position(position: Vec3, velocity: Vec3) -> Vec3 {
    Vec3::new(
        position.x + velocity.x * DT,
        position.y + velocity.y * DT,
        position.z + velocity.z * DT,
    )
}

pub(crate) fn initial_velocity(input: &ShotInput, max_speed: f64) -> Vec3 {
    let speed = input.power.clamp(0.0, 1.0) * max_speed;
    Vec3::new(
        speed * input.horizontal_angle.sin() * input.vertical_angle.cos(),
        speed * input.vertical_angle.sin(),
        speed * input.horizontal_angle.cos() * input.vertical_angle.cos(),
    )
}
