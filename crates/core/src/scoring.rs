//! Unit score scaling.
//!
//! Raw grades come back on a 0-10 scale. Each exercise part contributes a
//! fixed share of the unit's 0-10 total.

use crate::profile::Skill;
use serde::{Deserialize, Serialize};

/// Shadowing (pronunciation) share of a speaking unit.
pub const SHADOWING_WEIGHT: f64 = 5.0;
/// Free-speaking session share of a speaking unit.
pub const CONVERSATION_WEIGHT: f64 = 5.0;
/// Points for finishing the sentence scramble.
pub const SENTENCE_SCRAMBLE_POINTS: f64 = 2.0;
/// Points for ordering the paragraph.
pub const PARAGRAPH_ORDER_POINTS: f64 = 2.0;
/// Essay share of a writing unit.
pub const ESSAY_WEIGHT: f64 = 6.0;

pub const PASS_MARK: f64 = 6.0;

/// Scales a raw 0-10 grade to a part worth `weight` points.
pub fn scale(raw: f64, weight: f64) -> f64 {
    raw.clamp(0.0, 10.0) / 10.0 * weight
}

/// The parts a student completed in one unit, as raw grades.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "skill", rename_all = "lowercase")]
pub enum UnitScorecard {
    Speaking {
        shadowing_raw: Option<f64>,
        conversation_raw: Option<f64>,
    },
    Writing {
        sentence_scramble_done: bool,
        paragraph_order_done: bool,
        essay_raw: Option<f64>,
    },
}

impl UnitScorecard {
    pub fn skill(&self) -> Skill {
        match self {
            UnitScorecard::Speaking { .. } => Skill::Speaking,
            UnitScorecard::Writing { .. } => Skill::Writing,
        }
    }

    /// The unit total on the 0-10 scale. Missing parts count zero.
    pub fn total(&self) -> f64 {
        match *self {
            UnitScorecard::Speaking {
                shadowing_raw,
                conversation_raw,
            } => {
                shadowing_raw.map_or(0.0, |raw| scale(raw, SHADOWING_WEIGHT))
                    + conversation_raw.map_or(0.0, |raw| scale(raw, CONVERSATION_WEIGHT))
            }
            UnitScorecard::Writing {
                sentence_scramble_done,
                paragraph_order_done,
                essay_raw,
            } => {
                let scramble = if sentence_scramble_done {
                    SENTENCE_SCRAMBLE_POINTS
                } else {
                    0.0
                };
                let paragraph = if paragraph_order_done {
                    PARAGRAPH_ORDER_POINTS
                } else {
                    0.0
                };
                scramble + paragraph + essay_raw.map_or(0.0, |raw| scale(raw, ESSAY_WEIGHT))
            }
        }
    }

    pub fn passed(&self) -> bool {
        passed(self.total())
    }
}

pub fn passed(total: f64) -> bool {
    total >= PASS_MARK
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Excellent,
    Good,
    Fair,
    NeedsWork,
}

impl ScoreBand {
    pub fn of(total: f64) -> Self {
        if total >= 8.0 {
            ScoreBand::Excellent
        } else if total >= 6.0 {
            ScoreBand::Good
        } else if total >= 4.0 {
            ScoreBand::Fair
        } else {
            ScoreBand::NeedsWork
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_speaking_unit_total() {
        let card = UnitScorecard::Speaking {
            shadowing_raw: Some(8.0),
            conversation_raw: Some(6.0),
        };
        assert_abs_diff_eq!(card.total(), 7.0);
        assert!(card.passed());
        assert_eq!(card.skill(), Skill::Speaking);

        let partial = UnitScorecard::Speaking {
            shadowing_raw: None,
            conversation_raw: Some(10.0),
        };
        assert_abs_diff_eq!(partial.total(), 5.0);
        assert!(!partial.passed());
    }

    #[test]
    fn test_writing_unit_total() {
        let card = UnitScorecard::Writing {
            sentence_scramble_done: true,
            paragraph_order_done: true,
            essay_raw: Some(5.0),
        };
        assert_abs_diff_eq!(card.total(), 7.0);

        let essay_only = UnitScorecard::Writing {
            sentence_scramble_done: false,
            paragraph_order_done: false,
            essay_raw: Some(10.0),
        };
        assert_abs_diff_eq!(essay_only.total(), 6.0);
        assert!(essay_only.passed());
    }

    #[test]
    fn test_scale_clamps_out_of_range_grades() {
        assert_abs_diff_eq!(scale(12.0, 5.0), 5.0);
        assert_abs_diff_eq!(scale(-1.0, 6.0), 0.0);
    }

    #[test]
    fn test_bands() {
        assert_eq!(ScoreBand::of(8.0), ScoreBand::Excellent);
        assert_eq!(ScoreBand::of(7.9), ScoreBand::Good);
        assert_eq!(ScoreBand::of(4.0), ScoreBand::Fair);
        assert_eq!(ScoreBand::of(3.99), ScoreBand::NeedsWork);
    }

    #[test]
    fn test_scorecard_wire_format() {
        let card: UnitScorecard = serde_json::from_str(
            r#"{"skill": "writing", "sentence_scramble_done": true, "paragraph_order_done": false, "essay_raw": 8}"#,
        )
        .unwrap();
        assert_abs_diff_eq!(card.total(), 2.0 + 4.8);
    }
}
