//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    audio_utils::MAX_AUDIO_BODY_BYTES,
    handlers,
    models::{
        Band, Category, CheckResponse, CreateSpeakingSessionPayload, ErrorResponse, Feedback,
        GradingResponse, LoginPayload, LoginRejection, LoginResponse, ModelInfo,
        ParagraphCheckPayload, Phase, Piece, ProfileResponse, PronunciationPayload,
        PuzzleResponse, QuestionInfo, RosterResponse, ScorecardPayload, SentenceCheckPayload,
        SessionOpenedResponse, SettingsResponse, SpeakingSessionView, SpeakingUnitInfo,
        SpeechPayload, SpeechResponse, StructureInfo, SubmitTurnPayload, TurnResponse, TurnView,
        UnitResultResponse, UpdateSettingsPayload, WritingGradePayload, WritingUnitInfo,
    },
    state::AppState,
};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_models,
        handlers::get_settings,
        handlers::update_settings,
        handlers::search_roster,
        handlers::login,
        handlers::get_profile,
        handlers::record_result,
        handlers::speaking_curriculum,
        handlers::writing_curriculum,
        handlers::scramble_sentence,
        handlers::check_sentence,
        handlers::scramble_paragraph,
        handlers::check_paragraph,
        handlers::grade_writing,
        handlers::grade_pronunciation,
        handlers::synthesize_speech,
        handlers::create_speaking_session,
        handlers::get_speaking_session,
        handlers::submit_turn,
        handlers::finalize_session,
        handlers::abandon_session,
    ),
    components(
        schemas(
            ErrorResponse, ModelInfo, SettingsResponse, UpdateSettingsPayload, RosterResponse,
            LoginPayload, LoginRejection, LoginResponse, ProfileResponse, ScorecardPayload,
            Band, UnitResultResponse, QuestionInfo, SpeakingUnitInfo, StructureInfo,
            WritingUnitInfo, Piece, PuzzleResponse, SentenceCheckPayload, ParagraphCheckPayload,
            CheckResponse, Category, Feedback, GradingResponse, WritingGradePayload,
            PronunciationPayload, SpeechPayload, SpeechResponse, CreateSpeakingSessionPayload,
            SubmitTurnPayload, Phase, TurnView, SpeakingSessionView, SessionOpenedResponse,
            TurnResponse
        )
    ),
    tags(
        (name = "Lingua API", description = "English speaking and writing practice with AI grading")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/models", get(handlers::list_models))
        .route(
            "/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .route("/roster", get(handlers::search_roster))
        .route("/login", post(handlers::login))
        .route("/profiles/{name}", get(handlers::get_profile))
        .route("/profiles/{name}/results", post(handlers::record_result))
        .route("/curriculum/speaking", get(handlers::speaking_curriculum))
        .route("/curriculum/writing", get(handlers::writing_curriculum))
        .route(
            "/curriculum/writing/{id}/scramble/{index}",
            get(handlers::scramble_sentence),
        )
        .route(
            "/curriculum/writing/{id}/scramble/{index}/check",
            post(handlers::check_sentence),
        )
        .route(
            "/curriculum/writing/{id}/paragraph",
            get(handlers::scramble_paragraph),
        )
        .route(
            "/curriculum/writing/{id}/paragraph/check",
            post(handlers::check_paragraph),
        )
        .route("/writing/grade", post(handlers::grade_writing))
        .route(
            "/speaking/pronunciation",
            post(handlers::grade_pronunciation).layer(DefaultBodyLimit::max(MAX_AUDIO_BODY_BYTES)),
        )
        .route("/speech", post(handlers::synthesize_speech))
        .route(
            "/speaking/sessions",
            post(handlers::create_speaking_session),
        )
        .route(
            "/speaking/sessions/{id}",
            get(handlers::get_speaking_session).delete(handlers::abandon_session),
        )
        .route(
            "/speaking/sessions/{id}/turns",
            post(handlers::submit_turn).layer(DefaultBodyLimit::max(MAX_AUDIO_BODY_BYTES)),
        )
        .route(
            "/speaking/sessions/{id}/finalize",
            post(handlers::finalize_session),
        )
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/models",
            "/settings",
            "/roster",
            "/login",
            "/profiles/{name}",
            "/profiles/{name}/results",
            "/curriculum/writing/{id}/paragraph/check",
            "/writing/grade",
            "/speaking/pronunciation",
            "/speech",
            "/speaking/sessions",
            "/speaking/sessions/{id}",
            "/speaking/sessions/{id}/turns",
            "/speaking/sessions/{id}/finalize",
        ] {
            assert!(
                paths.iter().any(|p| p.as_str() == expected),
                "missing {}",
                expected
            );
        }
    }
}
