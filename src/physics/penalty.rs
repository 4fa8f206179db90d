//! Penalty-kick shot simulator.
//!
//! TODO: the goalkeeper's influence is not modeled; the verdict depends
//! only on whether the ball crosses the goal plane within the frame.

use uuid::Uuid;

use super::{initial_velocity, integrate_step, shot_hash, step_position, ShotInput, ShotResult, Vec3, Verdict};

const MAX_ITERATIONS: u32 = 500;
const MAX_SPEED: f64 = 30.0;
const AIR_RESISTANCE: f64 = 0.008;

/// Goal line sits at this `z`; `start.z` is expected to be behind it
/// (smaller `z`).
const GOAL_DISTANCE: f64 = 11.0;
const GOAL_HALF_WIDTH: f64 = 3.66;
const CROSSBAR_HEIGHT: f64 = 2.44;
const GROUND_EPSILON: f64 = 0.05;

pub fn simulate(match_id: Uuid, shot_index: u32, input: &ShotInput) -> ShotResult {
    let mut position = input.start;
    let mut velocity = initial_velocity(input, MAX_SPEED);
    let mut trajectory = vec![position];

    let mut verdict = Verdict::Miss;
    for _ in 0..MAX_ITERATIONS {
        let prev_z = position.z;
        integrate_step(position, &mut velocity, input.spin, AIR_RESISTANCE);
        position = step_position(position, velocity);
        trajectory.push(position);

        if prev_z < GOAL_DISTANCE && position.z >= GOAL_DISTANCE {
            let within_width = position.x.abs() <= GOAL_HALF_WIDTH;
            let below_crossbar = position.y <= CROSSBAR_HEIGHT && position.y >= 0.0;
            verdict = if within_width && below_crossbar {
                Verdict::Goal
            } else {
                Verdict::Miss
            };
            break;
        }
        if position.y <= GROUND_EPSILON && velocity.y < 0.0 {
            verdict = Verdict::Miss;
            break;
        }
    }

    let hash = shot_hash(match_id, shot_index, position, verdict);
    ShotResult {
        trajectory,
        final_position: position,
        verdict,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Spin;

    fn straight_shot(power: f64, vertical_angle: f64) -> ShotInput {
        ShotInput {
            start: Vec3::new(0.0, 0.2, 0.0),
            horizontal_angle: 0.0,
            vertical_angle,
            power,
            spin: Spin::default(),
        }
    }

    #[test]
    fn a_full_power_centered_shot_with_enough_arc_scores() {
        let input = straight_shot(1.0, 0.2);
        let result = simulate(Uuid::new_v4(), 0, &input);
        assert_eq!(result.verdict, Verdict::Goal);
    }

    #[test]
    fn a_weak_shot_falls_short_of_the_goal_line() {
        let input = straight_shot(0.05, 0.02);
        let result = simulate(Uuid::new_v4(), 0, &input);
        assert_eq!(result.verdict, Verdict::Miss);
    }

    #[test]
    fn a_wide_shot_misses() {
        let input = ShotInput {
            start: Vec3::new(0.0, 0.2, 0.0),
            horizontal_angle: 0.35,
            vertical_angle: 0.2,
            power: 1.0,
            spin: Spin::default(),
        };
        let result = simulate(Uuid::new_v4(), 0, &input);
        assert_eq!(result.verdict, Verdict::Miss);
    }

    #[test]
    fn a_shot_over_the_crossbar_misses() {
        let input = straight_shot(1.0, 0.5);
        let result = simulate(Uuid::new_v4(), 0, &input);
        assert_eq!(result.verdict, Verdict::Miss);
    }

    #[test]
    fn identical_inputs_hash_identically() {
        let input = straight_shot(1.0, 0.2);
        let a = simulate(Uuid::nil(), 3, &input);
        let b = simulate(Uuid::nil(), 3, &input);
        assert_eq!(a.hash, b.hash);
    }
}
