//! API Models
//!
//! Request and response bodies for the HTTP surface, annotated with `utoipa`
//! for the OpenAPI document. Core domain types are mirrored here rather than
//! annotated in place so the core crate stays free of web concerns.

use chrono::{DateTime, Utc};
use lingua_core::{
    curriculum::{EssayStructure, PuzzlePiece, ScriptedQuestion, SpeakingUnit, WritingKind, WritingUnit},
    grading::{ErrorCategory, FeedbackItem, GradingResult},
    models::ModelDescriptor,
    profile::{Skill, StudentProfile},
    scoring::ScoreBand,
    session::{ConversationTurn, SessionPhase, Speaker},
    tutor::WritingTask,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

// --- Settings & models ---

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct ModelInfo {
    #[schema(example = "gemini-2.5-flash-preview-05-20")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_default: bool,
}

impl From<&ModelDescriptor> for ModelInfo {
    fn from(model: &ModelDescriptor) -> Self {
        Self {
            id: model.id.clone(),
            name: model.name.clone(),
            description: model.description.clone(),
            is_default: model.is_default,
        }
    }
}

/// Current settings. The key itself is never returned.
#[derive(Serialize, ToSchema, Debug)]
pub struct SettingsResponse {
    pub has_api_key: bool,
    pub selected_model: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct UpdateSettingsPayload {
    /// Replaces the stored key when present.
    pub api_key: Option<String>,
    #[schema(example = "gemini-2.0-flash")]
    pub selected_model: Option<String>,
}

// --- Roster & profiles ---

#[derive(Deserialize, Debug, Default)]
pub struct RosterQuery {
    pub q: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct RosterResponse {
    pub students: Vec<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct LoginPayload {
    #[schema(example = "Pham Anh Thu")]
    pub name: String,
    /// Optional Gemini key entered on the login screen.
    pub api_key: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct LoginRejection {
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct ProfileResponse {
    pub name: String,
    pub speaking_scores: Vec<f64>,
    pub writing_scores: Vec<f64>,
    pub speaking_average: Option<f64>,
    pub writing_average: Option<f64>,
    pub lessons_completed: u32,
    pub streak: u32,
    pub last_practice: DateTime<Utc>,
}

impl From<&StudentProfile> for ProfileResponse {
    fn from(profile: &StudentProfile) -> Self {
        Self {
            name: profile.name.clone(),
            speaking_scores: profile.speaking_scores.clone(),
            writing_scores: profile.writing_scores.clone(),
            speaking_average: profile.average(Skill::Speaking),
            writing_average: profile.average(Skill::Writing),
            lessons_completed: profile.lessons_completed,
            streak: profile.streak,
            last_practice: profile.last_practice,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct LoginResponse {
    pub name: String,
    pub profile: ProfileResponse,
    pub has_api_key: bool,
}

/// Raw part grades for one completed unit. Mirrors `UnitScorecard`.
#[derive(Deserialize, ToSchema, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "skill", rename_all = "lowercase")]
pub enum ScorecardPayload {
    Speaking {
        shadowing_raw: Option<f64>,
        conversation_raw: Option<f64>,
    },
    Writing {
        #[serde(default)]
        sentence_scramble_done: bool,
        #[serde(default)]
        paragraph_order_done: bool,
        essay_raw: Option<f64>,
    },
}

impl From<ScorecardPayload> for lingua_core::scoring::UnitScorecard {
    fn from(payload: ScorecardPayload) -> Self {
        match payload {
            ScorecardPayload::Speaking {
                shadowing_raw,
                conversation_raw,
            } => Self::Speaking {
                shadowing_raw,
                conversation_raw,
            },
            ScorecardPayload::Writing {
                sentence_scramble_done,
                paragraph_order_done,
                essay_raw,
            } => Self::Writing {
                sentence_scramble_done,
                paragraph_order_done,
                essay_raw,
            },
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Excellent,
    Good,
    Fair,
    NeedsWork,
}

impl From<ScoreBand> for Band {
    fn from(band: ScoreBand) -> Self {
        match band {
            ScoreBand::Excellent => Band::Excellent,
            ScoreBand::Good => Band::Good,
            ScoreBand::Fair => Band::Fair,
            ScoreBand::NeedsWork => Band::NeedsWork,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct UnitResultResponse {
    #[schema(example = "speaking")]
    pub skill: String,
    pub total: f64,
    pub passed: bool,
    pub band: Band,
    pub profile: ProfileResponse,
}

// --- Curriculum ---

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct QuestionInfo {
    pub question: String,
    pub hint: String,
}

impl From<&ScriptedQuestion> for QuestionInfo {
    fn from(q: &ScriptedQuestion) -> Self {
        Self {
            question: q.question.clone(),
            hint: q.hint.clone(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct SpeakingUnitInfo {
    pub id: u32,
    pub title: String,
    pub description: String,
    pub shadowing_sentences: Vec<String>,
    pub questions: Vec<QuestionInfo>,
}

impl From<&SpeakingUnit> for SpeakingUnitInfo {
    fn from(unit: &SpeakingUnit) -> Self {
        Self {
            id: unit.id,
            title: unit.title.clone(),
            description: unit.description.clone(),
            shadowing_sentences: unit.shadowing_sentences.clone(),
            questions: unit.questions.iter().map(QuestionInfo::from).collect(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct StructureInfo {
    pub introduction: String,
    pub body: String,
    pub conclusion: String,
}

impl From<&EssayStructure> for StructureInfo {
    fn from(s: &EssayStructure) -> Self {
        Self {
            introduction: s.introduction.clone(),
            body: s.body.clone(),
            conclusion: s.conclusion.clone(),
        }
    }
}

/// The sentence and paragraph solutions are not exposed; clients fetch
/// shuffled pieces and submit their answer for checking.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct WritingUnitInfo {
    pub id: u32,
    pub title: String,
    pub description: String,
    #[schema(example = "essay")]
    pub task: String,
    pub scramble_count: usize,
    pub paragraph_length: usize,
    pub essay_prompt: String,
    pub essay_hint: String,
    pub structure: StructureInfo,
}

impl From<&WritingUnit> for WritingUnitInfo {
    fn from(unit: &WritingUnit) -> Self {
        Self {
            id: unit.id,
            title: unit.title.clone(),
            description: unit.description.clone(),
            task: match unit.task {
                WritingKind::Essay => "essay".to_string(),
                WritingKind::Email => "email".to_string(),
            },
            scramble_count: unit.scramble_sentences.len(),
            paragraph_length: unit.paragraph_sentences.len(),
            essay_prompt: unit.essay_prompt.clone(),
            essay_hint: unit.essay_hint.clone(),
            structure: StructureInfo::from(&unit.structure),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct Piece {
    pub id: usize,
    pub text: String,
}

impl From<PuzzlePiece> for Piece {
    fn from(piece: PuzzlePiece) -> Self {
        Self {
            id: piece.id,
            text: piece.text,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct PuzzleResponse {
    pub pieces: Vec<Piece>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct SentenceCheckPayload {
    pub words: Vec<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct ParagraphCheckPayload {
    /// Piece ids in the order the student arranged them.
    pub order: Vec<usize>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct CheckResponse {
    pub correct: bool,
}

// --- Grading ---

#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Grammar,
    Vocabulary,
    Pronunciation,
    Coherence,
    Other,
}

impl From<ErrorCategory> for Category {
    fn from(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Grammar => Category::Grammar,
            ErrorCategory::Vocabulary => Category::Vocabulary,
            ErrorCategory::Pronunciation => Category::Pronunciation,
            ErrorCategory::Coherence => Category::Coherence,
            ErrorCategory::Other => Category::Other,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct Feedback {
    pub original: String,
    pub correction: String,
    pub explanation: String,
    pub category: Category,
}

impl From<&FeedbackItem> for Feedback {
    fn from(item: &FeedbackItem) -> Self {
        Self {
            original: item.original.clone(),
            correction: item.correction.clone(),
            explanation: item.explanation.clone(),
            category: item.category.into(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct GradingResponse {
    pub score: f64,
    pub score_breakdown: Option<BTreeMap<String, f64>>,
    pub feedback: String,
    pub detailed_errors: Vec<Feedback>,
    pub improved_version: Option<String>,
    pub transcription: Option<String>,
    /// Model that produced the grade, when known.
    pub model: Option<String>,
}

impl GradingResponse {
    pub fn new(result: &GradingResult, model: Option<String>) -> Self {
        Self {
            score: result.score,
            score_breakdown: result.score_breakdown.clone(),
            feedback: result.feedback.clone(),
            detailed_errors: result.detailed_errors.iter().map(Feedback::from).collect(),
            improved_version: result.improved_version.clone(),
            transcription: result.transcription.clone(),
            model,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct WritingGradePayload {
    pub text: String,
    /// `IELTS`, `TOEIC` or `General`.
    #[serde(default)]
    #[schema(value_type = String, example = "IELTS")]
    pub task: WritingTask,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct PronunciationPayload {
    /// Base64 recording, optionally as a data URL.
    pub audio: String,
    pub mime_type: Option<String>,
    pub target_text: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct SpeechPayload {
    pub text: String,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SpeechResponse {
    /// Base64 WAV, absent when synthesis failed.
    pub audio_wav: Option<String>,
}

// --- Speaking sessions ---

#[derive(Deserialize, ToSchema, Debug)]
pub struct CreateSpeakingSessionPayload {
    #[schema(example = "Pham Anh Thu")]
    pub student: String,
    #[schema(example = 1)]
    pub unit_id: u32,
    /// Overrides the configured number of student turns.
    pub turn_budget: Option<usize>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct SubmitTurnPayload {
    pub audio: String,
    pub mime_type: Option<String>,
}

#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    AwaitingFirstPrompt,
    AwaitingUserTurn,
    ProcessingTurn,
    Finalizing,
    Graded,
    Abandoned,
}

impl From<SessionPhase> for Phase {
    fn from(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::NotStarted => Phase::NotStarted,
            SessionPhase::AwaitingFirstPrompt => Phase::AwaitingFirstPrompt,
            SessionPhase::AwaitingUserTurn => Phase::AwaitingUserTurn,
            SessionPhase::ProcessingTurn => Phase::ProcessingTurn,
            SessionPhase::Finalizing => Phase::Finalizing,
            SessionPhase::Graded => Phase::Graded,
            SessionPhase::Abandoned => Phase::Abandoned,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct TurnView {
    #[schema(example = "examiner")]
    pub speaker: String,
    pub text: String,
}

impl From<&ConversationTurn> for TurnView {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            speaker: match turn.speaker {
                Speaker::Examiner => "examiner".to_string(),
                Speaker::Student => "student".to_string(),
            },
            text: turn.text.clone(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct SpeakingSessionView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub student: String,
    pub unit_id: u32,
    pub topic: String,
    pub phase: Phase,
    pub turn_budget: usize,
    pub user_turns: usize,
    pub history: Vec<TurnView>,
    pub result: Option<GradingResponse>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SessionOpenedResponse {
    pub session: SpeakingSessionView,
    pub greeting: String,
    pub greeting_audio_wav: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct TurnResponse {
    pub turn: usize,
    pub transcription: String,
    pub reply: String,
    pub reply_audio_wav: Option<String>,
    /// True when the session now awaits `finalize`.
    pub finished: bool,
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lingua_core::scoring::UnitScorecard;

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Session not found".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"Session not found"}"#);
    }

    #[test]
    fn test_scorecard_payload_converts() {
        let json = r#"{"skill": "speaking", "shadowing_raw": 8, "conversation_raw": 6}"#;
        let payload: ScorecardPayload = serde_json::from_str(json).unwrap();
        let card: UnitScorecard = payload.into();
        assert_eq!(
            card,
            UnitScorecard::Speaking {
                shadowing_raw: Some(8.0),
                conversation_raw: Some(6.0)
            }
        );

        let json = r#"{"skill": "writing", "essay_raw": 7.5}"#;
        let payload: ScorecardPayload = serde_json::from_str(json).unwrap();
        assert_eq!(
            UnitScorecard::from(payload),
            UnitScorecard::Writing {
                sentence_scramble_done: false,
                paragraph_order_done: false,
                essay_raw: Some(7.5)
            }
        );
    }

    #[test]
    fn test_scorecard_payload_rejects_unknown_skill() {
        let json = r#"{"skill": "listening"}"#;
        assert!(serde_json::from_str::<ScorecardPayload>(json).is_err());
    }

    #[test]
    fn test_writing_payload_task_defaults_to_general() {
        let payload: WritingGradePayload = serde_json::from_str(r#"{"text": "Hello."}"#).unwrap();
        assert_eq!(payload.task, WritingTask::General);

        let payload: WritingGradePayload =
            serde_json::from_str(r#"{"text": "Hello.", "task": "TOEIC"}"#).unwrap();
        assert_eq!(payload.task, WritingTask::Toeic);
    }

    #[test]
    fn test_settings_response_does_not_carry_key() {
        let json = serde_json::to_value(SettingsResponse {
            has_api_key: true,
            selected_model: "gemini-2.0-flash".into(),
        })
        .unwrap();
        assert_eq!(json["has_api_key"], true);
        assert!(json.get("api_key").is_none());
    }

    #[test]
    fn test_profile_response_reports_averages() {
        let now = Utc.with_ymd_and_hms(2025, 4, 2, 9, 0, 0).unwrap();
        let mut profile = StudentProfile::new("Pham Anh Thu", now);
        profile.record(Skill::Speaking, 6.0, now);
        profile.record(Skill::Speaking, 8.0, now);

        let response = ProfileResponse::from(&profile);
        assert_eq!(response.speaking_average, Some(7.0));
        assert_eq!(response.writing_average, None);
        assert_eq!(response.lessons_completed, 2);
    }

    #[test]
    fn test_grading_response_flattens_categories() {
        let result: GradingResult = serde_json::from_str(
            r#"{"score": 7, "feedback": "Good", "detailedErrors": [
                {"original": "he go", "correction": "he goes", "type": "grammar"}
            ]}"#,
        )
        .unwrap();
        let response = GradingResponse::new(&result, Some("gemini-2.0-flash".into()));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["detailed_errors"][0]["category"], "grammar");
        assert_eq!(json["model"], "gemini-2.0-flash");
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&Phase::from(SessionPhase::AwaitingUserTurn)).unwrap();
        assert_eq!(json, "\"awaiting_user_turn\"");
    }

    #[test]
    fn test_create_session_payload_missing_field() {
        let result: Result<CreateSpeakingSessionPayload, _> =
            serde_json::from_str(r#"{"student": "Pham Anh Thu"}"#);
        assert!(result.is_err());
    }
}
