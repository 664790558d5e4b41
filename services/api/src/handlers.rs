//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests: settings, the
//! roster and profiles, curriculum and puzzle checks, single-shot grading,
//! speech synthesis and the speaking session lifecycle.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use lingua_core::{
    curriculum::WritingUnit,
    error::{ErrorKind, InvokeError},
    invoker::InvokerSettings,
    profile::{load_or_create, profile_key},
    scoring::{ScoreBand, UnitScorecard},
    session::{SessionError, SpeakingSession},
    tutor::TutorError,
};
use secrecy::SecretString;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    audio_utils::{decode_clip, encode_wav_base64},
    models::{
        CheckResponse, CreateSpeakingSessionPayload, ErrorResponse, GradingResponse,
        LoginPayload, LoginRejection, LoginResponse, ModelInfo, ParagraphCheckPayload, Piece,
        ProfileResponse, PronunciationPayload, PuzzleResponse, RosterQuery, RosterResponse,
        ScorecardPayload, SentenceCheckPayload, SessionOpenedResponse, SettingsResponse,
        SpeakingSessionView, SpeakingUnitInfo, SpeechPayload, SpeechResponse, SubmitTurnPayload,
        TurnResponse, TurnView, UnitResultResponse, UpdateSettingsPayload, WritingGradePayload,
        WritingUnitInfo,
    },
    sessions::SessionEntry,
    state::AppState,
};

/// Keys shorter than this are rejected before they reach the provider.
pub const MIN_API_KEY_LEN: usize = 20;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    UnknownStudent {
        message: String,
        suggestions: Vec<String>,
    },
    Conflict(String),
    PreconditionFailed(String),
    BadGateway(String),
    ServiceUnavailable(String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) | ApiError::UnknownStudent { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a failed model invocation onto a status and a message the
    /// student can act on. Provider details stay in the logs.
    pub fn from_invoke(err: InvokeError) -> Self {
        let message = err.user_message();
        match err.kind() {
            ErrorKind::Configuration => ApiError::PreconditionFailed(message),
            ErrorKind::ServiceUnavailable => {
                warn!(error = %err, "All models failed");
                ApiError::ServiceUnavailable(message)
            }
            ErrorKind::Request | ErrorKind::MalformedResponse => {
                error!(error = %err, "Model call failed");
                ApiError::BadGateway(message)
            }
            ErrorKind::Cancelled => ApiError::Conflict(message),
        }
    }

    pub fn from_tutor(err: TutorError) -> Self {
        match err {
            TutorError::Invoke(err) => Self::from_invoke(err),
            TutorError::Prompt(err) => ApiError::InternalServerError(err.into()),
        }
    }

    pub fn from_session(err: SessionError) -> Self {
        match err {
            SessionError::InvalidTurnBudget(_) => ApiError::BadRequest(err.to_string()),
            SessionError::WrongPhase { .. } => ApiError::Conflict(err.to_string()),
            SessionError::Tutor(err) => Self::from_tutor(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::UnknownStudent {
                message,
                suggestions,
            } => (
                status,
                Json(LoginRejection {
                    message,
                    suggestions,
                }),
            )
                .into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (status, Json(ErrorResponse { message })).into_response()
            }
            ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::Conflict(message)
            | ApiError::PreconditionFailed(message)
            | ApiError::BadGateway(message)
            | ApiError::ServiceUnavailable(message) => {
                (status, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn parse_api_key(raw: &str) -> Result<SecretString, ApiError> {
    let key = raw.trim();
    if key.chars().count() < MIN_API_KEY_LEN {
        return Err(ApiError::BadRequest(format!(
            "API key must be at least {} characters long",
            MIN_API_KEY_LEN
        )));
    }
    Ok(SecretString::from(key.to_string()))
}

fn settings_response(settings: &InvokerSettings) -> SettingsResponse {
    SettingsResponse {
        has_api_key: settings.has_api_key(),
        selected_model: settings.selected_model.clone(),
    }
}

/// Resolves a roster name, or fails with "did you mean" suggestions.
fn require_student<'a>(state: &'a AppState, name: &str) -> Result<&'a str, ApiError> {
    state.roster.find(name).ok_or_else(|| ApiError::UnknownStudent {
        message: format!("'{}' is not on the class roster", name.trim()),
        suggestions: state
            .roster
            .suggest(name)
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

fn writing_unit(state: &AppState, id: u32) -> Result<&WritingUnit, ApiError> {
    state
        .curriculum
        .writing_unit(id)
        .ok_or_else(|| ApiError::NotFound(format!("Writing unit {} not found", id)))
}

fn session_not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Speaking session with id '{}' not found", id))
}

fn session_busy(id: Uuid) -> ApiError {
    ApiError::Conflict(format!(
        "Speaking session '{}' is busy with another request",
        id
    ))
}

fn session_view(id: Uuid, entry: &SessionEntry, session: &SpeakingSession) -> SpeakingSessionView {
    SpeakingSessionView {
        id,
        student: entry.student.clone(),
        unit_id: entry.unit_id,
        topic: session.topic().to_string(),
        phase: session.phase().into(),
        turn_budget: session.turn_budget(),
        user_turns: session.user_turns(),
        history: session.history().iter().map(TurnView::from).collect(),
        result: session.result().map(|r| GradingResponse::new(r, None)),
        created_at: entry.created_at,
    }
}

// --- Settings ---

/// List the selectable text models in fallback priority order.
#[utoipa::path(
    get,
    path = "/models",
    responses(
        (status = 200, description = "Model catalog", body = [ModelInfo])
    )
)]
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelInfo>> {
    Json(
        state
            .tutor
            .invoker()
            .catalog()
            .models()
            .iter()
            .map(ModelInfo::from)
            .collect(),
    )
}

/// Get the current settings. The API key is never returned.
#[utoipa::path(
    get,
    path = "/settings",
    responses(
        (status = 200, description = "Current settings", body = SettingsResponse)
    )
)]
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SettingsResponse> {
    Json(settings_response(&*state.settings.read().await))
}

/// Update the API key and/or the selected model.
#[utoipa::path(
    put,
    path = "/settings",
    request_body = UpdateSettingsPayload,
    responses(
        (status = 200, description = "Settings updated", body = SettingsResponse),
        (status = 400, description = "Invalid key or unknown model", body = ErrorResponse)
    )
)]
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateSettingsPayload>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let api_key = payload.api_key.as_deref().map(parse_api_key).transpose()?;
    if let Some(model) = &payload.selected_model {
        if !state.tutor.invoker().catalog().contains(model) {
            return Err(ApiError::BadRequest(format!("Unknown model '{}'", model)));
        }
    }

    let mut settings = state.settings.write().await;
    if let Some(key) = api_key {
        settings.api_key = Some(key);
    }
    if let Some(model) = payload.selected_model {
        settings.selected_model = model;
    }
    info!(
        has_api_key = settings.has_api_key(),
        model = %settings.selected_model,
        "Settings updated"
    );
    Ok(Json(settings_response(&settings)))
}

// --- Roster & profiles ---

/// Search the class roster by name.
#[utoipa::path(
    get,
    path = "/roster",
    responses(
        (status = 200, description = "Matching students in roster order", body = RosterResponse)
    ),
    params(
        ("q" = Option<String>, Query, description = "Case-insensitive substring of the name")
    )
)]
pub async fn search_roster(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RosterQuery>,
) -> Json<RosterResponse> {
    let students = state
        .roster
        .search(query.q.as_deref().unwrap_or(""))
        .into_iter()
        .map(str::to_string)
        .collect();
    Json(RosterResponse { students })
}

/// Log in as a student on the roster. Creates the profile on first login.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginPayload,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Invalid API key", body = ErrorResponse),
        (status = 404, description = "Name not on the roster", body = LoginRejection),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<LoginResponse>, ApiError> {
    let name = require_student(&state, &payload.name)?.to_string();

    if let Some(raw) = payload.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        let key = parse_api_key(raw)?;
        state.settings.write().await.api_key = Some(key);
    }

    let profile = load_or_create(state.profiles.as_ref(), &name, Utc::now()).await?;
    let has_api_key = state.settings.read().await.has_api_key();
    info!(student = %name, has_api_key, "Student logged in");

    Ok(Json(LoginResponse {
        name,
        profile: ProfileResponse::from(&profile),
        has_api_key,
    }))
}

/// Get a student's progress.
#[utoipa::path(
    get,
    path = "/profiles/{name}",
    responses(
        (status = 200, description = "Student progress", body = ProfileResponse),
        (status = 404, description = "Unknown student or no profile yet", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("name" = String, Path, description = "Student name as on the roster")
    )
)]
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let name = require_student(&state, &name)?.to_string();
    let profile = state
        .profiles
        .load(&profile_key(&name))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No progress recorded for '{}' yet", name)))?;
    Ok(Json(ProfileResponse::from(&profile)))
}

/// Record a completed unit and update the student's streak.
#[utoipa::path(
    post,
    path = "/profiles/{name}/results",
    request_body = ScorecardPayload,
    responses(
        (status = 200, description = "Unit recorded", body = UnitResultResponse),
        (status = 400, description = "Invalid grade", body = ErrorResponse),
        (status = 404, description = "Unknown student", body = LoginRejection),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("name" = String, Path, description = "Student name as on the roster")
    )
)]
pub async fn record_result(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(payload): Json<ScorecardPayload>,
) -> Result<Json<UnitResultResponse>, ApiError> {
    let name = require_student(&state, &name)?.to_string();
    let card = UnitScorecard::from(payload);
    let raw_grades = match card {
        UnitScorecard::Speaking {
            shadowing_raw,
            conversation_raw,
        } => vec![shadowing_raw, conversation_raw],
        UnitScorecard::Writing { essay_raw, .. } => vec![essay_raw],
    };
    if raw_grades.into_iter().flatten().any(|raw| !raw.is_finite()) {
        return Err(ApiError::BadRequest("Grades must be finite numbers".to_string()));
    }

    let now = Utc::now();
    let mut profile = load_or_create(state.profiles.as_ref(), &name, now).await?;
    let total = card.total();
    profile.record(card.skill(), total, now);
    state.profiles.save(&profile_key(&name), &profile).await?;
    info!(student = %name, skill = %card.skill(), total, streak = profile.streak, "Unit recorded");

    Ok(Json(UnitResultResponse {
        skill: card.skill().to_string(),
        total,
        passed: card.passed(),
        band: ScoreBand::of(total).into(),
        profile: ProfileResponse::from(&profile),
    }))
}

// --- Curriculum ---

/// List the speaking units.
#[utoipa::path(
    get,
    path = "/curriculum/speaking",
    responses(
        (status = 200, description = "Speaking units", body = [SpeakingUnitInfo])
    )
)]
pub async fn speaking_curriculum(State(state): State<Arc<AppState>>) -> Json<Vec<SpeakingUnitInfo>> {
    Json(state.curriculum.speaking.iter().map(SpeakingUnitInfo::from).collect())
}

/// List the writing units.
#[utoipa::path(
    get,
    path = "/curriculum/writing",
    responses(
        (status = 200, description = "Writing units", body = [WritingUnitInfo])
    )
)]
pub async fn writing_curriculum(State(state): State<Arc<AppState>>) -> Json<Vec<WritingUnitInfo>> {
    Json(state.curriculum.writing.iter().map(WritingUnitInfo::from).collect())
}

/// Get the shuffled words of one scramble sentence.
#[utoipa::path(
    get,
    path = "/curriculum/writing/{id}/scramble/{index}",
    responses(
        (status = 200, description = "Shuffled words", body = PuzzleResponse),
        (status = 404, description = "Unknown unit or sentence", body = ErrorResponse)
    ),
    params(
        ("id" = u32, Path, description = "Writing unit ID"),
        ("index" = usize, Path, description = "0-based sentence index")
    )
)]
pub async fn scramble_sentence(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(u32, usize)>,
) -> Result<Json<PuzzleResponse>, ApiError> {
    let unit = writing_unit(&state, id)?;
    let pieces = unit
        .scrambled_sentence(index, &mut rand::rng())
        .ok_or_else(|| ApiError::NotFound(format!("Unit {} has no sentence {}", id, index)))?;
    Ok(Json(PuzzleResponse {
        pieces: pieces.into_iter().map(Piece::from).collect(),
    }))
}

/// Check a rebuilt scramble sentence.
#[utoipa::path(
    post,
    path = "/curriculum/writing/{id}/scramble/{index}/check",
    request_body = SentenceCheckPayload,
    responses(
        (status = 200, description = "Check result", body = CheckResponse),
        (status = 404, description = "Unknown unit or sentence", body = ErrorResponse)
    ),
    params(
        ("id" = u32, Path, description = "Writing unit ID"),
        ("index" = usize, Path, description = "0-based sentence index")
    )
)]
pub async fn check_sentence(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(u32, usize)>,
    Json(payload): Json<SentenceCheckPayload>,
) -> Result<Json<CheckResponse>, ApiError> {
    let correct = writing_unit(&state, id)?
        .check_sentence(index, &payload.words)
        .ok_or_else(|| ApiError::NotFound(format!("Unit {} has no sentence {}", id, index)))?;
    Ok(Json(CheckResponse { correct }))
}

/// Get the shuffled sentences of the paragraph-ordering exercise.
#[utoipa::path(
    get,
    path = "/curriculum/writing/{id}/paragraph",
    responses(
        (status = 200, description = "Shuffled sentences", body = PuzzleResponse),
        (status = 404, description = "Unknown unit", body = ErrorResponse)
    ),
    params(
        ("id" = u32, Path, description = "Writing unit ID")
    )
)]
pub async fn scramble_paragraph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u32>,
) -> Result<Json<PuzzleResponse>, ApiError> {
    let pieces = writing_unit(&state, id)?.scrambled_paragraph(&mut rand::rng());
    Ok(Json(PuzzleResponse {
        pieces: pieces.into_iter().map(Piece::from).collect(),
    }))
}

/// Check a paragraph ordering.
#[utoipa::path(
    post,
    path = "/curriculum/writing/{id}/paragraph/check",
    request_body = ParagraphCheckPayload,
    responses(
        (status = 200, description = "Check result", body = CheckResponse),
        (status = 404, description = "Unknown unit", body = ErrorResponse)
    ),
    params(
        ("id" = u32, Path, description = "Writing unit ID")
    )
)]
pub async fn check_paragraph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u32>,
    Json(payload): Json<ParagraphCheckPayload>,
) -> Result<Json<CheckResponse>, ApiError> {
    let correct = writing_unit(&state, id)?.check_paragraph(&payload.order);
    Ok(Json(CheckResponse { correct }))
}

// --- Grading & speech ---

/// Grade a piece of writing and get an improved version back.
#[utoipa::path(
    post,
    path = "/writing/grade",
    request_body = WritingGradePayload,
    responses(
        (status = 200, description = "Writing graded", body = GradingResponse),
        (status = 400, description = "Empty text", body = ErrorResponse),
        (status = 412, description = "No API key configured", body = ErrorResponse),
        (status = 502, description = "Model rejected the request or answered badly", body = ErrorResponse),
        (status = 503, description = "Every model is unavailable", body = ErrorResponse)
    )
)]
pub async fn grade_writing(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WritingGradePayload>,
) -> Result<Json<GradingResponse>, ApiError> {
    if payload.text.trim().is_empty() {
        return Err(ApiError::BadRequest("There is no text to grade".to_string()));
    }
    let settings = state.settings_snapshot().await;
    let graded = state
        .tutor
        .analyze_writing(&settings, &payload.text, payload.task, &CancellationToken::new())
        .await
        .map_err(ApiError::from_tutor)?;
    Ok(Json(GradingResponse::new(&graded.value, Some(graded.model))))
}

/// Score a recorded reading of a shadowing sentence.
#[utoipa::path(
    post,
    path = "/speaking/pronunciation",
    request_body = PronunciationPayload,
    responses(
        (status = 200, description = "Pronunciation graded", body = GradingResponse),
        (status = 400, description = "Invalid audio", body = ErrorResponse),
        (status = 412, description = "No API key configured", body = ErrorResponse),
        (status = 502, description = "Model rejected the request or answered badly", body = ErrorResponse),
        (status = 503, description = "Every model is unavailable", body = ErrorResponse)
    )
)]
pub async fn grade_pronunciation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PronunciationPayload>,
) -> Result<Json<GradingResponse>, ApiError> {
    let clip = decode_clip(&payload.audio, payload.mime_type.as_deref())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let settings = state.settings_snapshot().await;
    let graded = state
        .tutor
        .analyze_pronunciation(&settings, &clip, &payload.target_text, &CancellationToken::new())
        .await
        .map_err(ApiError::from_tutor)?;
    Ok(Json(GradingResponse::new(&graded.value, Some(graded.model))))
}

/// Synthesize speech with the examiner voice.
#[utoipa::path(
    post,
    path = "/speech",
    request_body = SpeechPayload,
    responses(
        (status = 200, description = "WAV audio, or none when synthesis failed", body = SpeechResponse),
        (status = 412, description = "No API key configured", body = ErrorResponse)
    )
)]
pub async fn synthesize_speech(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SpeechPayload>,
) -> Result<Json<SpeechResponse>, ApiError> {
    let settings = state.settings_snapshot().await;
    let audio = state
        .tutor
        .synthesize(&settings, &payload.text, &CancellationToken::new())
        .await
        .map_err(ApiError::from_invoke)?;
    Ok(Json(SpeechResponse {
        audio_wav: audio.as_ref().and_then(encode_wav_base64),
    }))
}

// --- Speaking sessions ---

/// Start a speaking session for a unit and get the examiner's opening.
#[utoipa::path(
    post,
    path = "/speaking/sessions",
    request_body = CreateSpeakingSessionPayload,
    responses(
        (status = 201, description = "Session opened", body = SessionOpenedResponse),
        (status = 400, description = "Invalid turn budget", body = ErrorResponse),
        (status = 404, description = "Unknown student or unit", body = ErrorResponse),
        (status = 412, description = "No API key configured", body = ErrorResponse),
        (status = 502, description = "Model rejected the request or answered badly", body = ErrorResponse),
        (status = 503, description = "Every model is unavailable", body = ErrorResponse)
    )
)]
pub async fn create_speaking_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSpeakingSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let student = require_student(&state, &payload.student)?.to_string();
    let unit = state
        .curriculum
        .speaking_unit(payload.unit_id)
        .ok_or_else(|| {
            ApiError::NotFound(format!("Speaking unit {} not found", payload.unit_id))
        })?;
    let turn_budget = payload.turn_budget.unwrap_or(state.config.turn_budget);
    let session = SpeakingSession::new(unit.title.clone(), unit.scripted_questions(), turn_budget)
        .map_err(ApiError::from_session)?;

    let (id, entry) = state.sessions.insert(student, unit.id, session).await;
    let settings = state.settings_snapshot().await;
    let mut session = entry.session.lock().await;
    let opened = session
        .open(&state.tutor, &settings, &entry.token)
        .await
        .map(|turn| (turn.text.clone(), turn.audio.as_ref().and_then(encode_wav_base64)));
    let (greeting, greeting_audio_wav) = match opened {
        Ok(opened) => opened,
        Err(err) => {
            drop(session);
            state.sessions.remove(id).await;
            return Err(ApiError::from_session(err));
        }
    };

    info!(session_id = %id, student = %entry.student, unit_id = entry.unit_id, turn_budget, "Speaking session opened");
    let response = SessionOpenedResponse {
        session: session_view(id, &entry, &session),
        greeting,
        greeting_audio_wav,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Get a speaking session's state and history.
#[utoipa::path(
    get,
    path = "/speaking/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SpeakingSessionView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session is busy", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_speaking_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SpeakingSessionView>, ApiError> {
    let Some(entry) = state.sessions.get(id).await else {
        return state
            .sessions
            .graded(id)
            .await
            .map(Json)
            .ok_or_else(|| session_not_found(id));
    };
    let session = entry.session.try_lock().map_err(|_| session_busy(id))?;
    Ok(Json(session_view(id, &entry, &session)))
}

/// Submit one recorded student answer.
#[utoipa::path(
    post,
    path = "/speaking/sessions/{id}/turns",
    request_body = SubmitTurnPayload,
    responses(
        (status = 200, description = "Turn committed", body = TurnResponse),
        (status = 400, description = "Invalid audio", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session is busy, cancelled or not awaiting a turn", body = ErrorResponse),
        (status = 412, description = "No API key configured", body = ErrorResponse),
        (status = 502, description = "Model rejected the request or answered badly", body = ErrorResponse),
        (status = 503, description = "Every model is unavailable", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn submit_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitTurnPayload>,
) -> Result<Json<TurnResponse>, ApiError> {
    let clip = decode_clip(&payload.audio, payload.mime_type.as_deref())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let entry = state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| session_not_found(id))?;
    let settings = state.settings_snapshot().await;
    let mut session = entry.session.try_lock().map_err(|_| session_busy(id))?;

    let outcome = session
        .submit_turn(&state.tutor, &settings, clip, &entry.token)
        .await
        .map_err(ApiError::from_session)?;

    Ok(Json(TurnResponse {
        turn: outcome.turn,
        transcription: outcome.transcription,
        reply: outcome.reply,
        reply_audio_wav: outcome.reply_audio.as_ref().and_then(encode_wav_base64),
        finished: outcome.finished,
        model: outcome.model,
    }))
}

/// Grade the whole conversation once the last turn is in.
#[utoipa::path(
    post,
    path = "/speaking/sessions/{id}/finalize",
    responses(
        (status = 200, description = "Session graded", body = GradingResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session is busy, cancelled or not ready for grading", body = ErrorResponse),
        (status = 412, description = "No API key configured", body = ErrorResponse),
        (status = 502, description = "Model rejected the request or answered badly", body = ErrorResponse),
        (status = 503, description = "Every model is unavailable", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn finalize_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<GradingResponse>, ApiError> {
    let Some(entry) = state.sessions.get(id).await else {
        return state
            .sessions
            .graded(id)
            .await
            .and_then(|view| view.result)
            .map(Json)
            .ok_or_else(|| session_not_found(id));
    };
    let settings = state.settings_snapshot().await;
    let mut session = entry.session.try_lock().map_err(|_| session_busy(id))?;

    let result = session
        .finalize(&state.tutor, &settings, &entry.token)
        .await
        .map_err(ApiError::from_session)?;
    info!(session_id = %id, score = result.score, "Speaking session graded");
    let response = GradingResponse::new(result, None);

    let view = session_view(id, &entry, &session);
    drop(session);
    state.sessions.retire(id, view).await;
    Ok(Json(response))
}

/// Abandon a speaking session, cancelling any call in flight.
#[utoipa::path(
    delete,
    path = "/speaking/sessions/{id}",
    responses(
        (status = 200, description = "Session abandoned, or a graded session forgotten", body = SpeakingSessionView),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn abandon_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SpeakingSessionView>, ApiError> {
    let Some(entry) = state.sessions.remove(id).await else {
        return state
            .sessions
            .forget_graded(id)
            .await
            .map(Json)
            .ok_or_else(|| session_not_found(id));
    };
    entry.token.cancel();

    // Waits for an in-flight call to observe the cancellation and release the lock.
    let mut session = entry.session.lock().await;
    session.abandon();
    info!(session_id = %id, phase = %session.phase(), "Speaking session closed");
    Ok(Json(session_view(id, &entry, &session)))
}
