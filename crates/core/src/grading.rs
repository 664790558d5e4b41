//! Grading payloads returned by the remote model, and their validation.
//!
//! The model is asked for a single JSON object. Responses are unwrapped from
//! any markdown code fence, parsed, then checked against the shape the rest
//! of the tutor relies on. Anything that fails those checks is a malformed
//! response rather than a generic runtime failure.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::warn;

pub const MAX_SCORE: f64 = 10.0;

/// A payload shape the invoker can parse and check.
pub trait ResponseSchema: DeserializeOwned {
    fn validate(&self) -> Result<(), String>;
}

/// Strips a surrounding ```json fence (or a bare ``` fence) from model output.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parses and validates a model response body.
pub fn parse_response<T: ResponseSchema>(raw: &str) -> Result<T, String> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err("empty response".to_string());
    }
    let value: T = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;
    value.validate()?;
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Grammar,
    Vocabulary,
    Pronunciation,
    Coherence,
    #[serde(other)]
    Other,
}

/// One flagged mistake with its fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub original: String,
    pub correction: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(alias = "type", default = "default_category")]
    pub category: ErrorCategory,
}

fn default_category() -> ErrorCategory {
    ErrorCategory::Other
}

/// The immutable outcome of one graded submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingResult {
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_breakdown: Option<BTreeMap<String, f64>>,
    pub feedback: String,
    #[serde(default)]
    pub detailed_errors: Vec<FeedbackItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improved_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
}

impl GradingResult {
    /// Sum of the named sub-scores, when the model returned a breakdown.
    pub fn breakdown_total(&self) -> Option<f64> {
        self.score_breakdown.as_ref().map(|b| b.values().sum())
    }
}

impl ResponseSchema for GradingResult {
    fn validate(&self) -> Result<(), String> {
        if !self.score.is_finite() || !(0.0..=MAX_SCORE).contains(&self.score) {
            return Err(format!("score {} is outside 0-10", self.score));
        }
        if let Some(breakdown) = &self.score_breakdown {
            if let Some((name, value)) = breakdown
                .iter()
                .find(|(_, v)| !v.is_finite() || **v < 0.0)
            {
                return Err(format!("sub-score '{}' has invalid value {}", name, value));
            }
        }
        Ok(())
    }
}

/// Writing grading must come with a rewrite of the student's text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct WritingGrade(pub GradingResult);

impl ResponseSchema for WritingGrade {
    fn validate(&self) -> Result<(), String> {
        self.0.validate()?;
        match self.0.improved_version.as_deref() {
            Some(text) if !text.trim().is_empty() => Ok(()),
            _ => Err("missing improvedVersion".to_string()),
        }
    }
}

/// Pronunciation grading must say what the student actually said.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct PronunciationGrade(pub GradingResult);

impl ResponseSchema for PronunciationGrade {
    fn validate(&self) -> Result<(), String> {
        self.0.validate()?;
        if self.0.transcription.is_none() {
            return Err("missing transcription".to_string());
        }
        Ok(())
    }
}

/// The examiner's reply to one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReply {
    #[serde(default)]
    pub transcription: String,
    pub response: String,
}

impl ResponseSchema for TurnReply {
    fn validate(&self) -> Result<(), String> {
        if self.response.trim().is_empty() {
            return Err("empty examiner response".to_string());
        }
        Ok(())
    }
}

/// A named sub-score and its ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Criterion {
    pub name: &'static str,
    pub max: f64,
}

/// A fixed rubric. Criterion maxima always sum to [`MAX_SCORE`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rubric {
    pub name: &'static str,
    pub criteria: &'static [Criterion],
}

pub const SPEAKING_SESSION_RUBRIC: Rubric = Rubric {
    name: "speaking-session",
    criteria: &[
        Criterion { name: "Content", max: 3.0 },
        Criterion { name: "Language", max: 3.0 },
        Criterion { name: "Pronunciation", max: 2.0 },
        Criterion { name: "Fluency", max: 2.0 },
    ],
};

pub const PRONUNCIATION_RUBRIC: Rubric = Rubric {
    name: "pronunciation",
    criteria: &[
        Criterion { name: "Articulation", max: 3.0 },
        Criterion { name: "Intonation", max: 3.0 },
        Criterion { name: "Fluency", max: 2.0 },
        Criterion { name: "Confidence", max: 2.0 },
    ],
};

/// Writing sub-scores are each reported on the 0-10 band scale.
pub const WRITING_RUBRIC: Rubric = Rubric {
    name: "writing",
    criteria: &[
        Criterion { name: "Task Response", max: 10.0 },
        Criterion { name: "Coherence", max: 10.0 },
        Criterion { name: "Vocabulary", max: 10.0 },
        Criterion { name: "Grammar", max: 10.0 },
    ],
};

impl Rubric {
    pub fn max_for(&self, name: &str) -> Option<f64> {
        self.criteria
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.max)
    }

    /// Lists sub-scores that are unknown to this rubric or above their ceiling.
    pub fn deviations(&self, result: &GradingResult) -> Vec<String> {
        let Some(breakdown) = &result.score_breakdown else {
            return Vec::new();
        };
        breakdown
            .iter()
            .filter_map(|(name, value)| match self.max_for(name) {
                None => Some(format!("unexpected sub-score '{}'", name)),
                Some(max) if *value > max => {
                    Some(format!("sub-score '{}' = {} exceeds {}", name, value, max))
                }
                Some(_) => None,
            })
            .collect()
    }

    /// Logs deviations without rejecting the result.
    pub fn audit(&self, result: &GradingResult) {
        for deviation in self.deviations(result) {
            warn!(rubric = self.name, %deviation, "Grading result deviates from rubric");
        }
    }
}
