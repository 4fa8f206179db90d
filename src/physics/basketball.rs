//! Basketball shot simulator: scores iff the ball passes through the rim
//! cylinder on a descending trajectory.

use uuid::Uuid;

use super::{initial_velocity, integrate_step, shot_hash, step_position, ShotInput, ShotResult, Vec3, Verdict};

const MAX_ITERATIONS: u32 = 300;
const MAX_SPEED: f64 = 12.0;
const AIR_RESISTANCE: f64 = 0.005;

const RIM_DISTANCE: f64 = 6.0;
const RIM_RADIUS: f64 = 0.23;
const RIM_HEIGHT: f64 = 3.05;
const GROUND_EPSILON: f64 = 0.05;

pub fn simulate(match_id: Uuid, shot_index: u32, input: &ShotInput) -> ShotResult {
    let mut position = input.start;
    let mut velocity = initial_velocity(input, MAX_SPEED);
    let mut trajectory = vec![position];

    let mut verdict = Verdict::Miss;
    for _ in 0..MAX_ITERATIONS {
        let prev = position;
        integrate_step(position, &mut velocity, input.spin, AIR_RESISTANCE);
        position = step_position(position, velocity);
        trajectory.push(position);

        let crossed_rim_plane =
            (prev.z < RIM_DISTANCE && position.z >= RIM_DISTANCE) || (prev.z > RIM_DISTANCE && position.z <= RIM_DISTANCE);
        if crossed_rim_plane {
            let lateral = (position.x.powi(2) + (position.y - RIM_HEIGHT).max(0.0).powi(2)).sqrt();
            let descending = prev.y > position.y;
            if position.x.abs() <= RIM_RADIUS && (RIM_HEIGHT - 0.5..=RIM_HEIGHT + 0.2).contains(&position.y) && descending && lateral <= RIM_RADIUS + 0.1
            {
                verdict = Verdict::Score;
                break;
            }
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

    #[test]
    fn a_descending_shot_that_crosses_the_rim_plane_at_rim_height_scores() {
        // starts one step before the rim plane, already at rim height,
        // moving forward and slightly down: the very next step crosses
        // the rim plane while still within the rim cylinder.
        let input = ShotInput {
            start: Vec3::new(0.0, RIM_HEIGHT, RIM_DISTANCE - 0.01),
            horizontal_angle: 0.0,
            vertical_angle: -0.3,
            power: 0.5,
            spin: Spin::default(),
        };
        let result = simulate(Uuid::new_v4(), 0, &input);
        assert_eq!(result.verdict, Verdict::Score);
    }

    #[test]
    fn an_airball_misses() {
        let input = ShotInput {
            start: Vec3::new(0.0, 1.2, 0.0),
            horizontal_angle: 0.5,
            vertical_angle: 0.3,
            power: 0.3,
            spin: Spin::default(),
        };
        let result = simulate(Uuid::new_v4(), 0, &input);
        assert_eq!(result.verdict, Verdict::Miss);
    }
}
