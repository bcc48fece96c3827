use serde::Serialize;

use crate::audio::AudioCapture;
use crate::error::{AttemptKind, CaptureError, EvaluationError};
use crate::feedback::Feedback;
use crate::gateway::{EvaluationRequest, EvaluationTarget};
use crate::questions::Question;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Recording,
    Processing,
    Finished,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSession {
    pub question: Question,
    pub status: SessionStatus,
    pub is_recording: bool,
    pub feedback: Option<Feedback>,
    pub history: Vec<Feedback>,
    pub error: Option<String>,
    pub next_attempt: AttemptKind,
}

/// Owns the practice state for one question loop.
///
/// Status moves idle → recording → processing → finished, and from finished
/// either back to recording (re-reading the improved version) or to idle via
/// [`restart`](Self::restart). Every failure lands in idle with a message.
pub struct SessionController {
    question: Question,
    status: SessionStatus,
    feedback: Option<Feedback>,
    history: Vec<Feedback>,
    error: Option<String>,
    ticket: u64,
}

impl SessionController {
    pub fn new(question: Question) -> Self {
        Self {
            question,
            status: SessionStatus::Idle,
            feedback: None,
            history: Vec::new(),
            error: None,
            ticket: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn history(&self) -> &[Feedback] {
        &self.history
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn snapshot(&self) -> PracticeSession {
        PracticeSession {
            question: self.question.clone(),
            status: self.status,
            is_recording: self.status == SessionStatus::Recording,
            feedback: self.feedback.clone(),
            history: self.history.clone(),
            error: self.error.clone(),
            next_attempt: self.next_attempt(),
        }
    }

    pub fn next_attempt(&self) -> AttemptKind {
        if self.history.is_empty() {
            AttemptKind::FirstAttempt
        } else {
            AttemptKind::Retry
        }
    }

    pub fn can_start_recording(&self) -> bool {
        matches!(self.status, SessionStatus::Idle | SessionStatus::Finished)
    }

    /// Returns `Ok(false)` without touching the capture when a take or an
    /// evaluation is already in flight.
    pub fn start_recording<C: AudioCapture + ?Sized>(
        &mut self,
        capture: &mut C,
    ) -> Result<bool, CaptureError> {
        if !self.can_start_recording() {
            return Ok(false);
        }

        if let Err(error) = capture.start() {
            self.fail_to_idle(error.user_message());
            return Err(error);
        }

        self.status = SessionStatus::Recording;
        self.feedback = None;
        self.error = None;
        Ok(true)
    }

    /// Finalizes the take. The returned request must be evaluated and handed
    /// back through [`complete_evaluation`](Self::complete_evaluation).
    pub fn stop_recording<C: AudioCapture + ?Sized>(
        &mut self,
        capture: &mut C,
    ) -> Result<Option<EvaluationRequest>, CaptureError> {
        if self.status != SessionStatus::Recording {
            return Ok(None);
        }

        let audio = match capture.finish() {
            Ok(audio) => audio,
            Err(error) => {
                self.fail_to_idle(error.user_message());
                return Err(error);
            }
        };

        let target = match self.history.last() {
            Some(previous) => EvaluationTarget::Retry {
                previous: previous.clone(),
            },
            None => EvaluationTarget::FirstAttempt {
                question_text: self.question.text.clone(),
            },
        };

        self.ticket += 1;
        self.status = SessionStatus::Processing;
        Ok(Some(EvaluationRequest {
            ticket: self.ticket,
            audio,
            target,
        }))
    }

    /// Applies the gateway result. Returns `false` when the result belongs
    /// to an attempt that was reset in the meantime and is dropped.
    pub fn complete_evaluation(
        &mut self,
        ticket: u64,
        result: Result<Feedback, EvaluationError>,
    ) -> bool {
        if self.status != SessionStatus::Processing || ticket != self.ticket {
            return false;
        }

        match result {
            Ok(feedback) => {
                self.history.push(feedback.clone());
                self.feedback = Some(feedback);
                self.status = SessionStatus::Finished;
                self.error = None;
            }
            Err(error) => self.fail_to_idle(error.to_string()),
        }
        true
    }

    /// Back to a first attempt on the same question.
    pub fn restart(&mut self) -> bool {
        if self.status != SessionStatus::Finished {
            return false;
        }
        self.status = SessionStatus::Idle;
        self.feedback = None;
        self.history.clear();
        self.error = None;
        true
    }

    /// Resets everything for `question` from any state, releasing an active take.
    pub fn select_question<C: AudioCapture + ?Sized>(&mut self, question: Question, capture: &mut C) {
        if self.status == SessionStatus::Recording {
            capture.cancel();
        }
        self.question = question;
        self.status = SessionStatus::Idle;
        self.feedback = None;
        self.history.clear();
        self.error = None;
        // invalidates any evaluation still in flight
        self.ticket += 1;
    }

    fn fail_to_idle(&mut self, message: String) {
        self.status = SessionStatus::Idle;
        self.feedback = None;
        self.error = Some(message);
    }
}
