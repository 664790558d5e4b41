//! The tutor's remote operations: writing and pronunciation grading, examiner
//! turns, holistic session grading and speech synthesis.
//!
//! Every operation builds its prompt from the [`PromptLibrary`], runs through
//! the [`FallbackInvoker`] and validates the answer before handing it back.

use crate::{
    client::{AudioClip, Capability, GenerateRequest, Part, SpeechAudio},
    error::InvokeError,
    grading::{
        GradingResult, PRONUNCIATION_RUBRIC, PronunciationGrade, SPEAKING_SESSION_RUBRIC,
        TurnReply, WRITING_RUBRIC, WritingGrade,
    },
    invoker::{FallbackInvoker, Invocation, InvokerSettings},
    models::{TTS_MODEL, TTS_VOICE},
    prompts::{self, PromptError, PromptLibrary},
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum TutorError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

impl TutorError {
    pub fn user_message(&self) -> String {
        match self {
            TutorError::Invoke(err) => err.user_message(),
            TutorError::Prompt(_) => "The tutor is misconfigured. Please contact your teacher.".to_string(),
        }
    }
}

/// Exam flavour the writing grader is asked to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WritingTask {
    #[serde(rename = "IELTS")]
    Ielts,
    #[serde(rename = "TOEIC")]
    Toeic,
    #[default]
    General,
}

impl fmt::Display for WritingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritingTask::Ielts => write!(f, "IELTS"),
            WritingTask::Toeic => write!(f, "TOEIC"),
            WritingTask::General => write!(f, "General"),
        }
    }
}

/// What the examiner should say after acknowledging a student answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextPrompt<'a> {
    /// Ask exactly this pre-authored question.
    Scripted(&'a str),
    /// Ask a model-chosen follow-up on the topic.
    FollowUp,
    /// Close the interview without another question.
    Closing,
}

/// One examiner call: either the opening or a reply to student audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExaminerTurn<'a> {
    Opening { question: Option<&'a str> },
    Reply { audio: &'a AudioClip, next: NextPrompt<'a> },
}

/// The examiner's answer, with narration when synthesis succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct ExaminerReply {
    pub transcription: String,
    pub response: String,
    pub audio: Option<SpeechAudio>,
    pub model: String,
}

#[derive(Clone)]
pub struct TutorService {
    invoker: FallbackInvoker,
    prompts: Arc<PromptLibrary>,
}

impl TutorService {
    pub fn new(invoker: FallbackInvoker, prompts: Arc<PromptLibrary>) -> Self {
        Self { invoker, prompts }
    }

    pub fn invoker(&self) -> &FallbackInvoker {
        &self.invoker
    }

    /// Grades a piece of student writing and returns it with a rewrite.
    #[instrument(skip_all, fields(task = %task, chars = text.len()))]
    pub async fn analyze_writing(
        &self,
        settings: &InvokerSettings,
        text: &str,
        task: WritingTask,
        cancel: &CancellationToken,
    ) -> Result<Invocation<GradingResult>, TutorError> {
        let task_type = task.to_string();
        let prompt = self
            .prompts
            .render(prompts::WRITING, &[("task_type", task_type.as_str()), ("text", text)])?;
        let request = GenerateRequest::json(Capability::TextGrading, vec![Part::Text(prompt)]);

        let Invocation { value, model } = self
            .invoker
            .invoke_json::<WritingGrade>(settings, &request, cancel)
            .await?;
        WRITING_RUBRIC.audit(&value.0);
        info!(%model, score = value.0.score, "Writing graded");
        Ok(Invocation {
            value: value.0,
            model,
        })
    }

    /// Scores one recorded reading of `target_text` for the shadowing exercise.
    #[instrument(skip_all, fields(bytes = audio.data.len()))]
    pub async fn analyze_pronunciation(
        &self,
        settings: &InvokerSettings,
        audio: &AudioClip,
        target_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Invocation<GradingResult>, TutorError> {
        let prompt = self
            .prompts
            .render(prompts::PRONUNCIATION, &[("target_text", target_text)])?;
        let request = GenerateRequest::json(
            Capability::TextGrading,
            vec![Part::Audio(audio.clone()), Part::Text(prompt)],
        );

        let Invocation { value, model } = self
            .invoker
            .invoke_json::<PronunciationGrade>(settings, &request, cancel)
            .await?;
        PRONUNCIATION_RUBRIC.audit(&value.0);
        info!(%model, score = value.0.score, "Pronunciation graded");
        Ok(Invocation {
            value: value.0,
            model,
        })
    }

    /// Runs one examiner call. `context` is the conversation so far, already
    /// rendered as `Examiner:`/`Student:` lines.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn interact(
        &self,
        settings: &InvokerSettings,
        topic: &str,
        context: &str,
        turn: ExaminerTurn<'_>,
        cancel: &CancellationToken,
    ) -> Result<ExaminerReply, TutorError> {
        let system = self.prompts.render(
            prompts::EXAMINER_SYSTEM,
            &[("topic", topic), ("context", context)],
        )?;

        let parts = match turn {
            ExaminerTurn::Opening {
                question: Some(question),
            } => vec![Part::Text(self.prompts.render(
                prompts::EXAMINER_OPENING_SCRIPTED,
                &[("question", question)],
            )?)],
            ExaminerTurn::Opening { question: None } => vec![Part::Text(
                self.prompts
                    .render(prompts::EXAMINER_OPENING_OPEN, &[("topic", topic)])?,
            )],
            ExaminerTurn::Reply { audio, next } => {
                let prompt = match next {
                    NextPrompt::Scripted(question) => self
                        .prompts
                        .render(prompts::EXAMINER_TURN_SCRIPTED, &[("question", question)])?,
                    NextPrompt::FollowUp => {
                        self.prompts.render(prompts::EXAMINER_TURN_FOLLOW_UP, &[])?
                    }
                    NextPrompt::Closing => {
                        self.prompts.render(prompts::EXAMINER_TURN_CLOSING, &[])?
                    }
                };
                vec![Part::Audio(audio.clone()), Part::Text(prompt)]
            }
        };
        let request = GenerateRequest::json(Capability::TurnInteraction, parts)
            .with_system_instruction(system);

        let Invocation { value, model } = self
            .invoker
            .invoke_json::<TurnReply>(settings, &request, cancel)
            .await?;
        let audio = self.synthesize(settings, &value.response, cancel).await?;

        Ok(ExaminerReply {
            transcription: value.transcription,
            response: value.response,
            audio,
            model,
        })
    }

    /// Issues the holistic grading call over a full `AI:`/`USER:` transcript.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn grade_session(
        &self,
        settings: &InvokerSettings,
        topic: &str,
        transcript: &str,
        last_audio: Option<&AudioClip>,
        cancel: &CancellationToken,
    ) -> Result<Invocation<GradingResult>, TutorError> {
        let prompt = self.prompts.render(
            prompts::SESSION_GRADING,
            &[("topic", topic), ("transcript", transcript)],
        )?;
        let mut parts = Vec::with_capacity(2);
        if let Some(audio) = last_audio {
            parts.push(Part::Audio(audio.clone()));
        }
        parts.push(Part::Text(prompt));
        let request = GenerateRequest::json(Capability::TextGrading, parts);

        let graded = self
            .invoker
            .invoke_json::<GradingResult>(settings, &request, cancel)
            .await?;
        SPEAKING_SESSION_RUBRIC.audit(&graded.value);
        info!(model = %graded.model, score = graded.value.score, "Session graded");
        Ok(graded)
    }

    /// Speaks `text` with the examiner voice.
    ///
    /// Only a missing credential or cancellation is an error. Any provider
    /// failure yields `Ok(None)` so callers fall back to text.
    #[instrument(skip_all, fields(chars = text.len()))]
    pub async fn synthesize(
        &self,
        settings: &InvokerSettings,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<SpeechAudio>, InvokeError> {
        let api_key = settings.credential()?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let call = self
            .invoker
            .client()
            .synthesize(api_key, TTS_MODEL, TTS_VOICE, text);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(InvokeError::Cancelled),
            outcome = tokio::time::timeout(settings.attempt_timeout, call) => outcome,
        };

        match outcome {
            Ok(Ok(audio)) => Ok(Some(audio)),
            Ok(Err(error)) => {
                warn!(%error, "Speech synthesis failed, continuing with text only");
                Ok(None)
            }
            Err(_) => {
                warn!("Speech synthesis timed out, continuing with text only");
                Ok(None)
            }
        }
    }
}
