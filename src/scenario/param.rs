use std::collections::HashMap;
use std::str::FromStr;

use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use tracing::info;

use super::Scenario;
use crate::error::ScenarioError;

/// A per-user parameter generator expression.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ParamGenerator {
    /// Copied verbatim
    Literal(String),
    /// `[RAND:min:max]`: uniform integer in `[min, max)`
    Rand { min: i64, max: i64 },
    /// `[STEP:min:max]`: next value of the shared step sequence
    Step { min: i64, max: i64 },
}

impl ParamGenerator {
    /// Draw a value. `None` means the step sequence is exhausted.
    pub fn draw(&self, steps: &StepCounter) -> Option<String> {
        match self {
            ParamGenerator::Literal(value) => Some(value.clone()),
            ParamGenerator::Rand { min, max } => {
                Some(rand::thread_rng().gen_range(*min..*max).to_string())
            }
            ParamGenerator::Step { min, max } => steps.next(*min, *max).map(|v| v.to_string()),
        }
    }
}

impl FromStr for ParamGenerator {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (Some(start), Some(end)) = (s.find('['), s.find(']')) else {
            return Ok(ParamGenerator::Literal(s.to_string()));
        };
        let invalid = || ScenarioError::InvalidGenerator(s.to_string());
        if end < start {
            return Err(invalid());
        }

        let parts: Vec<&str> = s[start + 1..end].split(':').collect();
        let (kind, min, max) = match parts.as_slice() {
            [kind, min, max] => (*kind, *min, *max),
            _ => return Err(invalid()),
        };
        let min: i64 = min.trim().parse().map_err(|_| invalid())?;
        let max: i64 = max.trim().parse().map_err(|_| invalid())?;
        if max <= min {
            return Err(invalid());
        }

        match kind {
            "RAND" => Ok(ParamGenerator::Rand { min, max }),
            "STEP" => Ok(ParamGenerator::Step { min, max }),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for ParamGenerator {
    type Error = ScenarioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Monotonic sequence shared by every user built from one scenario.
///
/// Bounds are fixed by the first caller; later callers' bounds are ignored.
#[derive(Debug, Default)]
pub struct StepCounter {
    state: Mutex<Option<StepState>>,
}

#[derive(Debug)]
struct StepState {
    next: i64,
    max: i64,
}

impl StepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, min: i64, max: i64) -> Option<i64> {
        let mut guard = self.state.lock();
        let state = guard.get_or_insert_with(|| {
            info!(min, max, "step sequence initialized");
            StepState { next: min, max }
        });
        if state.next >= state.max {
            return None;
        }
        let value = state.next;
        state.next += 1;
        Some(value)
    }
}

impl Scenario {
    /// Draw a fresh parameter set for one user, or `None` once a step
    /// sequence has run out.
    pub fn draw_params(&self, steps: &StepCounter) -> Option<HashMap<String, String>> {
        self.param
            .iter()
            .map(|(name, generator)| generator.draw(steps).map(|value| (name.clone(), value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_literal() {
        assert_eq!(
            "plain".parse::<ParamGenerator>().unwrap(),
            ParamGenerator::Literal("plain".to_string())
        );
        assert_eq!(
            "half[open".parse::<ParamGenerator>().unwrap(),
            ParamGenerator::Literal("half[open".to_string())
        );
    }

    #[test]
    fn test_parse_directives() {
        assert_eq!(
            "[RAND:1:100]".parse::<ParamGenerator>().unwrap(),
            ParamGenerator::Rand { min: 1, max: 100 }
        );
        assert_eq!(
            "[STEP:5:8]".parse::<ParamGenerator>().unwrap(),
            ParamGenerator::Step { min: 5, max: 8 }
        );
    }

    #[test]
    fn test_parse_invalid_directives() {
        for raw in ["[UUID:1:2]", "[RAND:1]", "[RAND:a:b]", "[RAND:5:5]", "][RAND:1:2["] {
            assert!(
                matches!(raw.parse::<ParamGenerator>(), Err(ScenarioError::InvalidGenerator(_))),
                "{} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_step_counter_stops_at_bound() {
        let steps = StepCounter::new();
        assert_eq!(steps.next(3, 5), Some(3));
        assert_eq!(steps.next(3, 5), Some(4));
        assert_eq!(steps.next(3, 5), None);
        assert_eq!(steps.next(3, 5), None);
    }

    #[test]
    fn test_step_counter_first_bounds_win() {
        let steps = StepCounter::new();
        assert_eq!(steps.next(10, 12), Some(10));
        assert_eq!(steps.next(0, 1000), Some(11));
        assert_eq!(steps.next(0, 1000), None);
    }

    #[test]
    fn test_step_counter_starting_at_zero() {
        let steps = StepCounter::new();
        assert_eq!(steps.next(0, 2), Some(0));
        assert_eq!(steps.next(0, 2), Some(1));
        assert_eq!(steps.next(0, 2), None);
    }

    #[test]
    fn test_step_counters_are_independent() {
        let a = StepCounter::new();
        let b = StepCounter::new();
        assert_eq!(a.next(0, 10), Some(0));
        assert_eq!(a.next(0, 10), Some(1));
        assert_eq!(b.next(0, 10), Some(0));
    }

    #[test]
    fn test_step_counter_concurrent_draws_are_unique() {
        let steps = std::sync::Arc::new(StepCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let steps = steps.clone();
                std::thread::spawn(move || {
                    let mut drawn = Vec::new();
                    while let Some(v) = steps.next(0, 1000) {
                        drawn.push(v);
                    }
                    drawn
                })
            })
            .collect();

        let mut all: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_draw_params_stops_when_step_exhausted() {
        let scenario =
            Scenario::from_json(r#"{"param": {"NO": "[STEP:1:3]", "NAME": "bot"}, "run": []}"#)
                .unwrap();
        let steps = StepCounter::new();

        let first = scenario.draw_params(&steps).unwrap();
        assert_eq!(first["NO"], "1");
        assert_eq!(first["NAME"], "bot");
        assert_eq!(scenario.draw_params(&steps).unwrap()["NO"], "2");
        assert!(scenario.draw_params(&steps).is_none());
    }

    proptest! {
        #[test]
        fn prop_rand_within_bounds(min in -1000i64..1000, span in 1i64..1000) {
            let generator = ParamGenerator::Rand { min, max: min + span };
            let steps = StepCounter::new();
            let value: i64 = generator.draw(&steps).unwrap().parse().unwrap();
            prop_assert!(value >= min && value < min + span);
        }

        #[test]
        fn prop_step_never_reaches_bound(min in 0i64..50, span in 1i64..50, draws in 0usize..200) {
            let generator = ParamGenerator::Step { min, max: min + span };
            let steps = StepCounter::new();
            let mut produced = 0i64;
            for _ in 0..draws {
                match generator.draw(&steps) {
                    Some(v) => {
                        let v: i64 = v.parse().unwrap();
                        prop_assert!(v < min + span);
                        produced += 1;
                    }
                    None => prop_assert!(produced == span),
                }
            }
            prop_assert!(produced <= span);
        }
    }
}
