//! Movement input fed into the agent each tick
//!
//! Keyboard polling belongs to the front end; here the direction comes from a
//! scripted pattern so the client can run headless.

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::Vector2;

/// Seconds a wandering client keeps one direction
const WANDER_HOLD_SECS: f32 = 1.0;
/// Seconds spent on each side of the square pattern
const SQUARE_SIDE_SECS: f32 = 2.0;

/// Anything that can say which way the player wants to move
pub trait InputSource {
    /// Desired direction at `elapsed` seconds since the client started.
    /// Components are expected in [-1, 1]; zero means no input.
    fn direction(&mut self, elapsed: f32) -> Vector2;
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPattern {
    /// Never press anything
    Idle,
    /// Steer around a circle
    Circle,
    /// Hold each of D, S, A, W in turn
    Square,
    /// Press a random key combination every second
    Wander,
}

pub struct ScriptedInput {
    pattern: InputPattern,
    rng: StdRng,
    held: Vector2,
    next_change: f32,
}

impl ScriptedInput {
    pub fn new(pattern: InputPattern) -> Self {
        Self::with_rng(pattern, StdRng::from_entropy())
    }

    /// Deterministic variant for reproducible runs
    pub fn with_seed(pattern: InputPattern, seed: u64) -> Self {
        Self::with_rng(pattern, StdRng::seed_from_u64(seed))
    }

    fn with_rng(pattern: InputPattern, rng: StdRng) -> Self {
        Self {
            pattern,
            rng,
            held: Vector2::ZERO,
            next_change: 0.0,
        }
    }

    pub fn pattern(&self) -> InputPattern {
        self.pattern
    }

    fn wander(&mut self, elapsed: f32) -> Vector2 {
        if elapsed >= self.next_change {
            self.held = Vector2::new(
                self.rng.gen_range(-1..=1) as f32,
                self.rng.gen_range(-1..=1) as f32,
            );
            self.next_change = elapsed + WANDER_HOLD_SECS;
        }
        self.held
    }
}

impl InputSource for ScriptedInput {
    fn direction(&mut self, elapsed: f32) -> Vector2 {
        match self.pattern {
            InputPattern::Idle => Vector2::ZERO,
            InputPattern::Circle => Vector2::new(elapsed.cos(), elapsed.sin()),
            InputPattern::Square => match (elapsed / SQUARE_SIDE_SECS) as u32 % 4 {
                0 => Vector2::new(1.0, 0.0),
                1 => Vector2::new(0.0, 1.0),
                2 => Vector2::new(-1.0, 0.0),
                _ => Vector2::new(0.0, -1.0),
            },
            InputPattern::Wander => self.wander(elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_idle_is_zero() {
        let mut input = ScriptedInput::with_seed(InputPattern::Idle, 1);
        for step in 0..10 {
            assert_eq!(input.direction(step as f32 * 0.5), Vector2::ZERO);
        }
    }

    #[test]
    fn test_circle_is_unit_length() {
        let mut input = ScriptedInput::with_seed(InputPattern::Circle, 1);
        for step in 0..20 {
            assert_approx_eq!(input.direction(step as f32 * 0.3).length(), 1.0, 1e-5);
        }
    }

    #[test]
    fn test_square_cycles_through_sides() {
        let mut input = ScriptedInput::with_seed(InputPattern::Square, 1);
        assert_eq!(input.direction(0.5), Vector2::new(1.0, 0.0));
        assert_eq!(input.direction(2.5), Vector2::new(0.0, 1.0));
        assert_eq!(input.direction(4.5), Vector2::new(-1.0, 0.0));
        assert_eq!(input.direction(6.5), Vector2::new(0.0, -1.0));
        assert_eq!(input.direction(8.5), Vector2::new(1.0, 0.0));
    }

    #[test]
    fn test_wander_holds_direction() {
        let mut input = ScriptedInput::with_seed(InputPattern::Wander, 7);
        let first = input.direction(0.0);
        assert_eq!(input.direction(0.4), first);
        assert_eq!(input.direction(0.9), first);

        for step in 0..50 {
            let direction = input.direction(1.0 + step as f32);
            for component in [direction.x, direction.y] {
                assert!([-1.0, 0.0, 1.0].contains(&component));
            }
        }
    }

    #[test]
    fn test_wander_is_reproducible_with_seed() {
        let mut a = ScriptedInput::with_seed(InputPattern::Wander, 99);
        let mut b = ScriptedInput::with_seed(InputPattern::Wander, 99);
        for step in 0..10 {
            assert_eq!(a.direction(step as f32), b.direction(step as f32));
        }
    }
}
