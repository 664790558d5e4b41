//! Bounded multi-turn speaking session.
//!
//! A session opens with an examiner question, accepts up to `turn_budget`
//! recorded student answers, closes the interview on the last one and is then
//! graded exactly once over the whole transcript.
//!
//! A turn is committed only after its examiner call succeeds: the student
//! utterance and the examiner reply are appended together or not at all.

use crate::{
    client::{AudioClip, SpeechAudio},
    grading::GradingResult,
    invoker::InvokerSettings,
    tutor::{ExaminerTurn, NextPrompt, TutorError, TutorService},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub const DEFAULT_TURN_BUDGET: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    NotStarted,
    AwaitingFirstPrompt,
    AwaitingUserTurn,
    ProcessingTurn,
    Finalizing,
    Graded,
    Abandoned,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Graded | SessionPhase::Abandoned)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::NotStarted => "not started",
            SessionPhase::AwaitingFirstPrompt => "awaiting first prompt",
            SessionPhase::AwaitingUserTurn => "awaiting user turn",
            SessionPhase::ProcessingTurn => "processing turn",
            SessionPhase::Finalizing => "finalizing",
            SessionPhase::Graded => "graded",
            SessionPhase::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Examiner,
    Student,
}

impl Speaker {
    /// Label used in the examiner's running context.
    pub fn context_label(self) -> &'static str {
        match self {
            Speaker::Examiner => "Examiner",
            Speaker::Student => "Student",
        }
    }

    /// Label used in the transcript sent for grading.
    pub fn transcript_label(self) -> &'static str {
        match self {
            Speaker::Examiner => "AI",
            Speaker::Student => "USER",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    /// Examiner narration, when synthesis succeeded.
    pub audio: Option<SpeechAudio>,
}

impl ConversationTurn {
    fn examiner(text: String, audio: Option<SpeechAudio>) -> Self {
        Self {
            speaker: Speaker::Examiner,
            text,
            audio,
        }
    }

    fn student(text: String) -> Self {
        Self {
            speaker: Speaker::Student,
            text,
            audio: None,
        }
    }
}

/// Result of one committed student turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// 1-based index of the student turn just committed.
    pub turn: usize,
    pub transcription: String,
    pub reply: String,
    pub reply_audio: Option<SpeechAudio>,
    /// True when this was the last turn and the session now awaits grading.
    pub finished: bool,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("turn budget must be at least 1, got {0}")]
    InvalidTurnBudget(usize),

    #[error("session is {actual}, expected {expected}")]
    WrongPhase {
        expected: SessionPhase,
        actual: SessionPhase,
    },

    #[error(transparent)]
    Tutor(#[from] TutorError),
}

#[derive(Debug, Clone)]
pub struct SpeakingSession {
    topic: String,
    scripted_questions: Vec<String>,
    turn_budget: usize,
    phase: SessionPhase,
    history: Vec<ConversationTurn>,
    user_turns: usize,
    last_student_audio: Option<AudioClip>,
    result: Option<GradingResult>,
}

impl SpeakingSession {
    pub fn new(
        topic: impl Into<String>,
        scripted_questions: Vec<String>,
        turn_budget: usize,
    ) -> Result<Self, SessionError> {
        if turn_budget == 0 {
            return Err(SessionError::InvalidTurnBudget(turn_budget));
        }
        Ok(Self {
            topic: topic.into(),
            scripted_questions,
            turn_budget,
            phase: SessionPhase::NotStarted,
            history: Vec::new(),
            user_turns: 0,
            last_student_audio: None,
            result: None,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn turn_budget(&self) -> usize {
        self.turn_budget
    }

    pub fn user_turns(&self) -> usize {
        self.user_turns
    }

    pub fn result(&self) -> Option<&GradingResult> {
        self.result.as_ref()
    }

    /// The examiner context: one `Examiner: …` / `Student: …` line per turn.
    pub fn render_context(&self) -> String {
        self.render_with(Speaker::context_label)
    }

    /// The grading transcript: one `AI: …` / `USER: …` line per turn.
    pub fn transcript(&self) -> String {
        self.render_with(Speaker::transcript_label)
    }

    /// Each turn renders on exactly one line; embedded line breaks and
    /// whitespace runs collapse to single spaces.
    fn render_with(&self, label: fn(Speaker) -> &'static str) -> String {
        self.history
            .iter()
            .map(|turn| {
                let text = turn.text.split_whitespace().collect::<Vec<_>>().join(" ");
                format!("{}: {}", label(turn.speaker), text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn expect_phase(&self, expected: SessionPhase) -> Result<(), SessionError> {
        if self.phase != expected {
            return Err(SessionError::WrongPhase {
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    /// A transient phase found on entry means the previous call was dropped
    /// mid-flight. Nothing was committed, so roll back to the stable phase.
    fn recover_interrupted(&mut self) {
        let stable = match self.phase {
            SessionPhase::AwaitingFirstPrompt => SessionPhase::NotStarted,
            SessionPhase::ProcessingTurn => SessionPhase::AwaitingUserTurn,
            other => other,
        };
        if stable != self.phase {
            warn!(from = %self.phase, to = %stable, "Recovering interrupted session call");
            self.phase = stable;
        }
    }

    /// What the examiner asks after student turn `turn` (1-based).
    fn next_prompt(&self, turn: usize) -> NextPrompt<'_> {
        if turn >= self.turn_budget {
            return NextPrompt::Closing;
        }
        match self.scripted_questions.get(turn) {
            Some(question) => NextPrompt::Scripted(question),
            None => NextPrompt::FollowUp,
        }
    }

    /// Asks the examiner for the opening statement and records it as turn 0.
    #[instrument(skip_all, fields(topic = %self.topic))]
    pub async fn open(
        &mut self,
        tutor: &TutorService,
        settings: &InvokerSettings,
        cancel: &CancellationToken,
    ) -> Result<&ConversationTurn, SessionError> {
        self.recover_interrupted();
        self.expect_phase(SessionPhase::NotStarted)?;
        self.phase = SessionPhase::AwaitingFirstPrompt;

        let question = self.scripted_questions.first().map(String::as_str);
        let reply = tutor
            .interact(
                settings,
                &self.topic,
                "",
                ExaminerTurn::Opening { question },
                cancel,
            )
            .await;
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                self.phase = SessionPhase::NotStarted;
                return Err(err.into());
            }
        };

        self.history
            .push(ConversationTurn::examiner(reply.response, reply.audio));
        self.phase = SessionPhase::AwaitingUserTurn;
        info!(model = %reply.model, "Session opened");
        Ok(&self.history[self.history.len() - 1])
    }

    /// Submits one recorded student answer.
    #[instrument(skip_all, fields(topic = %self.topic, turn = self.user_turns + 1))]
    pub async fn submit_turn(
        &mut self,
        tutor: &TutorService,
        settings: &InvokerSettings,
        audio: AudioClip,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        self.recover_interrupted();
        self.expect_phase(SessionPhase::AwaitingUserTurn)?;

        let turn = self.user_turns + 1;
        let finished = turn >= self.turn_budget;
        self.phase = SessionPhase::ProcessingTurn;

        let context = self.render_context();
        let reply = tutor
            .interact(
                settings,
                &self.topic,
                &context,
                ExaminerTurn::Reply {
                    audio: &audio,
                    next: self.next_prompt(turn),
                },
                cancel,
            )
            .await;
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                self.phase = SessionPhase::AwaitingUserTurn;
                return Err(err.into());
            }
        };

        self.history
            .push(ConversationTurn::student(reply.transcription.clone()));
        self.history.push(ConversationTurn::examiner(
            reply.response.clone(),
            reply.audio.clone(),
        ));
        self.user_turns = turn;
        self.last_student_audio = Some(audio);
        self.phase = if finished {
            SessionPhase::Finalizing
        } else {
            SessionPhase::AwaitingUserTurn
        };
        info!(model = %reply.model, finished, "Turn committed");

        Ok(TurnOutcome {
            turn,
            transcription: reply.transcription,
            reply: reply.response,
            reply_audio: reply.audio,
            finished,
            model: reply.model,
        })
    }

    /// Issues the single holistic grading call. On failure the session stays
    /// in `Finalizing` and may be finalized again.
    #[instrument(skip_all, fields(topic = %self.topic))]
    pub async fn finalize(
        &mut self,
        tutor: &TutorService,
        settings: &InvokerSettings,
        cancel: &CancellationToken,
    ) -> Result<&GradingResult, SessionError> {
        self.expect_phase(SessionPhase::Finalizing)?;

        let transcript = self.transcript();
        let graded = tutor
            .grade_session(
                settings,
                &self.topic,
                &transcript,
                self.last_student_audio.as_ref(),
                cancel,
            )
            .await?;

        self.phase = SessionPhase::Graded;
        info!(model = %graded.model, score = graded.value.score, "Session graded");
        Ok(self.result.insert(graded.value))
    }

    /// Ends the session without grading. A graded session is left as is.
    pub fn abandon(&mut self) {
        if self.phase != SessionPhase::Graded {
            info!(topic = %self.topic, from = %self.phase, "Session abandoned");
            self.phase = SessionPhase::Abandoned;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{Capability, GenerateRequest, MockGenerativeClient, Part},
        error::{InvokeError, ProviderError},
        invoker::FallbackInvoker,
        models::ModelCatalog,
        prompts::PromptLibrary,
    };
    use approx::assert_abs_diff_eq;
    use secrecy::SecretString;
    use std::sync::{Arc, Mutex};

    fn settings() -> InvokerSettings {
        InvokerSettings::new(
            Some(SecretString::from("test-key-0123456789")),
            "gemini-2.5-flash-preview-05-20",
        )
    }

    fn prompt_text(request: &GenerateRequest) -> String {
        request
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::Audio(_) => None,
            })
            .collect()
    }

    /// Scripted examiner: every call is recorded; turn calls echo a
    /// transcription of "answer N", grading calls return a fixed grade.
    struct Examiner {
        requests: Arc<Mutex<Vec<GenerateRequest>>>,
        tutor: TutorService,
    }

    impl Examiner {
        fn new() -> Self {
            Self::with_failures(Vec::new())
        }

        /// `fail_on` lists 1-based call numbers that fail fatally.
        fn with_failures(fail_on: Vec<usize>) -> Self {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let recorded = requests.clone();
            let mut mock = MockGenerativeClient::new();
            mock.expect_generate().returning(move |_, _, req| {
                let mut calls = recorded.lock().unwrap();
                calls.push(req.clone());
                let call = calls.len();
                if fail_on.contains(&call) {
                    return Err(ProviderError::http(400, None, "bad request"));
                }
                if req.capability == Capability::TextGrading {
                    return Ok(r#"{"score": 7, "scoreBreakdown": {"Content": 2, "Language": 2, "Pronunciation": 1.5, "Fluency": 1.5}, "feedback": "Well done", "detailedErrors": []}"#.to_string());
                }
                let student_turns = calls
                    .iter()
                    .filter(|r| matches!(r.parts.first(), Some(Part::Audio(_))))
                    .count();
                let transcription = if matches!(req.parts.first(), Some(Part::Audio(_))) {
                    format!("answer {}", student_turns)
                } else {
                    String::new()
                };
                Ok(serde_json::json!({
                    "transcription": transcription,
                    "response": format!("examiner {}", call),
                })
                .to_string())
            });
            mock.expect_synthesize()
                .returning(|_, _, _, _| Err(ProviderError::new("no tts in tests")));

            let tutor = TutorService::new(
                FallbackInvoker::new(Arc::new(mock), ModelCatalog::default()),
                Arc::new(PromptLibrary::builtin()),
            );
            Self { requests, tutor }
        }

        fn requests(&self) -> Vec<GenerateRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn grading_calls(&self) -> usize {
            self.requests()
                .iter()
                .filter(|r| r.capability == Capability::TextGrading)
                .count()
        }
    }

    fn questions(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Scripted question {}?", i)).collect()
    }

    async fn run_turns(session: &mut SpeakingSession, examiner: &Examiner, n: usize) -> Vec<TurnOutcome> {
        let mut outcomes = Vec::new();
        for i in 0..n {
            outcomes.push(
                session
                    .submit_turn(
                        &examiner.tutor,
                        &settings(),
                        AudioClip::webm(vec![i as u8]),
                        &CancellationToken::new(),
                    )
                    .await
                    .unwrap(),
            );
        }
        outcomes
    }

    #[test]
    fn test_zero_budget_is_rejected() {
        assert!(matches!(
            SpeakingSession::new("Topic", vec![], 0),
            Err(SessionError::InvalidTurnBudget(0))
        ));
    }

    #[tokio::test]
    async fn test_opening_uses_first_scripted_question() {
        let examiner = Examiner::new();
        let mut session = SpeakingSession::new("Vietnam and ASEAN", questions(5), 5).unwrap();
        let opening = session
            .open(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(opening.speaker, Speaker::Examiner);
        assert!(opening.audio.is_none());
        assert_eq!(session.phase(), SessionPhase::AwaitingUserTurn);

        let first = &examiner.requests()[0];
        assert!(prompt_text(first).contains("ask exactly this question: \"Scripted question 0?\""));
    }

    #[tokio::test]
    async fn test_budget_closes_on_fifth_turn_with_more_questions_than_turns() {
        let examiner = Examiner::new();
        let mut session = SpeakingSession::new("Unit", questions(8), 5).unwrap();
        session
            .open(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap();
        let outcomes = run_turns(&mut session, &examiner, 5).await;

        let requests = examiner.requests();
        for turn in 1..5 {
            let text = prompt_text(&requests[turn]);
            assert!(
                text.contains(&format!("Ask exactly this NEXT question: \"Scripted question {}?\"", turn)),
                "turn {turn}: {text}"
            );
        }
        assert!(prompt_text(&requests[5]).contains("Do NOT ask another question."));
        assert!(outcomes[..4].iter().all(|o| !o.finished));
        assert!(outcomes[4].finished);
        assert_eq!(session.phase(), SessionPhase::Finalizing);
    }

    #[tokio::test]
    async fn test_budget_closes_on_fifth_turn_with_fewer_questions_than_turns() {
        let examiner = Examiner::new();
        let mut session = SpeakingSession::new("Unit", questions(2), 5).unwrap();
        session
            .open(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap();
        run_turns(&mut session, &examiner, 5).await;

        let requests = examiner.requests();
        assert!(prompt_text(&requests[1]).contains("\"Scripted question 1?\""));
        for turn in 2..5 {
            assert!(prompt_text(&requests[turn]).contains("Ask the NEXT follow-up question"));
        }
        assert!(prompt_text(&requests[5]).contains("Do NOT ask another question."));
        assert_eq!(session.phase(), SessionPhase::Finalizing);
    }

    #[tokio::test]
    async fn test_graded_session_rejects_turns_and_grades_once() {
        let examiner = Examiner::new();
        let mut session = SpeakingSession::new("Unit", vec![], 5).unwrap();
        session
            .open(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap();
        run_turns(&mut session, &examiner, 5).await;

        let err = session
            .submit_turn(
                &examiner.tutor,
                &settings(),
                AudioClip::webm(vec![0]),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::WrongPhase {
                actual: SessionPhase::Finalizing,
                ..
            }
        ));

        session
            .finalize(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.phase(), SessionPhase::Graded);
        assert_eq!(examiner.grading_calls(), 1);

        assert!(session
            .submit_turn(
                &examiner.tutor,
                &settings(),
                AudioClip::webm(vec![0]),
                &CancellationToken::new(),
            )
            .await
            .is_err());
        assert!(session
            .finalize(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .is_err());
        assert_eq!(examiner.grading_calls(), 1);
    }

    #[tokio::test]
    async fn test_global_warming_two_turn_scenario() {
        let examiner = Examiner::new();
        let mut session = SpeakingSession::new("Global Warming", vec![], 2).unwrap();
        session
            .open(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(prompt_text(&examiner.requests()[0])
            .contains("ask the first question about \"Global Warming\""));

        let outcomes = run_turns(&mut session, &examiner, 2).await;
        assert_eq!(outcomes[0].transcription, "answer 1");
        assert!(!outcomes[0].finished);
        assert!(prompt_text(&examiner.requests()[1]).contains("Ask the NEXT follow-up question"));
        assert_eq!(outcomes[1].transcription, "answer 2");
        assert!(outcomes[1].finished);
        assert!(prompt_text(&examiner.requests()[2]).contains("Do NOT ask another question."));

        let grade = session
            .finalize(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap()
            .clone();
        assert!((0.0..=10.0).contains(&grade.score));
        assert_eq!(grade.score_breakdown.as_ref().unwrap().len(), 4);
        assert_abs_diff_eq!(grade.breakdown_total().unwrap(), grade.score);

        let requests = examiner.requests();
        let grading = &requests[3];
        assert_eq!(grading.capability, Capability::TextGrading);
        assert!(matches!(grading.parts.first(), Some(Part::Audio(clip)) if clip.data == vec![1]));
        assert!(prompt_text(grading).contains(
            "AI: examiner 1\nUSER: answer 1\nAI: examiner 2\nUSER: answer 2\nAI: examiner 3"
        ));
    }

    #[tokio::test]
    async fn test_failed_turn_leaves_history_untouched() {
        // Call 1 is the opening, call 2 the first turn.
        let examiner = Examiner::with_failures(vec![2]);
        let mut session = SpeakingSession::new("Unit", vec![], 3).unwrap();
        session
            .open(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap();
        let before = session.history().to_vec();

        let err = session
            .submit_turn(
                &examiner.tutor,
                &settings(),
                AudioClip::webm(vec![1]),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Tutor(TutorError::Invoke(InvokeError::Rejected { .. }))
        ));
        assert_eq!(session.history(), before.as_slice());
        assert_eq!(session.user_turns(), 0);
        assert_eq!(session.phase(), SessionPhase::AwaitingUserTurn);

        let retry = session
            .submit_turn(
                &examiner.tutor,
                &settings(),
                AudioClip::webm(vec![1]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(retry.turn, 1);
        assert_eq!(session.history().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_grading_can_be_retried() {
        // Opening, one turn, then the first grading attempt fails.
        let examiner = Examiner::with_failures(vec![3]);
        let mut session = SpeakingSession::new("Unit", vec![], 1).unwrap();
        session
            .open(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap();
        run_turns(&mut session, &examiner, 1).await;

        assert!(session
            .finalize(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .is_err());
        assert_eq!(session.phase(), SessionPhase::Finalizing);
        assert!(session.result().is_none());

        session
            .finalize(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.phase(), SessionPhase::Graded);
        assert!(session.result().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_turn_commits_nothing() {
        let examiner = Examiner::new();
        let mut session = SpeakingSession::new("Unit", vec![], 2).unwrap();
        session
            .open(&examiner.tutor, &settings(), &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = session
            .submit_turn(&examiner.tutor, &settings(), AudioClip::webm(vec![1]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Tutor(TutorError::Invoke(InvokeError::Cancelled))
        ));
        assert_eq!(session.history().len(), 1);

        session.abandon();
        assert_eq!(session.phase(), SessionPhase::Abandoned);
        assert!(session.phase().is_terminal());
    }

    #[test]
    fn test_context_rendering_preserves_roles_and_text() {
        let mut session = SpeakingSession::new("Unit", vec![], 5).unwrap();
        session.history = vec![
            ConversationTurn::examiner("Hello: tell me about your family.".into(), None),
            ConversationTurn::student("I live with my parents, and my grandmother.".into()),
            ConversationTurn::examiner("Why?".into(), None),
        ];

        let context = session.render_context();
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(lines.len(), session.history().len());
        for (line, turn) in lines.iter().zip(session.history()) {
            let (label, text) = line.split_once(": ").unwrap();
            assert_eq!(label, turn.speaker.context_label());
            assert_eq!(text, turn.text);
        }
        assert_eq!(
            session.transcript(),
            "AI: Hello: tell me about your family.\nUSER: I live with my parents, and my grandmother.\nAI: Why?"
        );
    }

    #[test]
    fn test_multi_line_turns_render_on_one_line() {
        let mut session = SpeakingSession::new("Unit", vec![], 5).unwrap();
        session.history = vec![
            ConversationTurn::examiner("Good.\nNext question:\n  where do you live?".into(), None),
            ConversationTurn::student("In Hanoi.\r\nUSER: near the lake".into()),
        ];

        let transcript = session.transcript();
        assert_eq!(transcript.lines().count(), 2);
        assert_eq!(
            transcript,
            "AI: Good. Next question: where do you live?\nUSER: In Hanoi. USER: near the lake"
        );
        assert!(session.history()[0].text.contains('\n'));
    }
}
