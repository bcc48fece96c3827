use std::collections::VecDeque;
use std::sync::Mutex;

use ielts_speaking_coach_lib::audio::{encode_payload, AudioCapture, AudioPayload, SAMPLE_RATE_HZ};
use ielts_speaking_coach_lib::error::{
    AttemptKind, CaptureError, EvaluationError, EvaluationFailure, FIRST_ATTEMPT_MESSAGE,
    RETRY_ATTEMPT_MESSAGE,
};
use ielts_speaking_coach_lib::feedback::Feedback;
use ielts_speaking_coach_lib::gateway::{run_evaluation, Evaluator};
use ielts_speaking_coach_lib::questions::{find_question, first_question};
use ielts_speaking_coach_lib::session::{SessionController, SessionStatus};

struct ToneCapture {
    recording: bool,
}

impl ToneCapture {
    fn new() -> Self {
        Self { recording: false }
    }
}

impl AudioCapture for ToneCapture {
    fn start(&mut self) -> Result<(), CaptureError> {
        self.recording = true;
        Ok(())
    }

    fn finish(&mut self) -> Result<AudioPayload, CaptureError> {
        self.recording = false;
        let samples = (0..SAMPLE_RATE_HZ / 4)
            .map(|index| (index as f32 * 0.05).sin() * 0.3)
            .collect::<Vec<_>>();
        encode_payload(&samples, SAMPLE_RATE_HZ)
    }

    fn cancel(&mut self) {
        self.recording = false;
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    First { question_text: String },
    Retry { previous_band: String },
}

struct ScriptedEvaluator {
    replies: Mutex<VecDeque<Result<Feedback, EvaluationFailure>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedEvaluator {
    fn new(replies: Vec<Result<Feedback, EvaluationFailure>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn next_reply(&self, attempt: AttemptKind) -> Result<Feedback, EvaluationError> {
        self.replies
            .lock()
            .expect("reply script lock should not be poisoned")
            .pop_front()
            .unwrap_or(Err(EvaluationFailure::EmptyReply))
            .map_err(|cause| EvaluationError::new(attempt, cause))
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("call log lock should not be poisoned").clone()
    }
}

impl Evaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        audio: &AudioPayload,
        question_text: &str,
    ) -> Result<Feedback, EvaluationError> {
        assert_eq!(audio.mime_type, "audio/wav");
        assert!(!audio.data.is_empty());
        self.calls.lock().expect("call log lock should not be poisoned").push(Call::First {
            question_text: question_text.to_string(),
        });
        self.next_reply(AttemptKind::FirstAttempt)
    }

    async fn evaluate_retry(
        &self,
        previous: &Feedback,
        audio: &AudioPayload,
    ) -> Result<Feedback, EvaluationError> {
        assert!(!audio.data.is_empty());
        self.calls.lock().expect("call log lock should not be poisoned").push(Call::Retry {
            previous_band: previous.band_score.clone(),
        });
        self.next_reply(AttemptKind::Retry)
    }
}

fn feedback(band: &str) -> Feedback {
    Feedback {
        transcription: "I usually go to the park near my house.".to_string(),
        band_score: band.to_string(),
        fluency: "Trôi chảy, ít ngắt quãng.".to_string(),
        vocabulary: "Từ vựng cơ bản.".to_string(),
        grammar: "Ít lỗi ngữ pháp.".to_string(),
        improved_version: "I tend to unwind in the leafy park just around the corner.".to_string(),
        suggestions: vec!["one".to_string(), "two".to_string(), "three".to_string()],
    }
}

async fn record_and_evaluate(
    controller: &mut SessionController,
    capture: &mut ToneCapture,
    evaluator: &ScriptedEvaluator,
) {
    assert_eq!(controller.start_recording(capture), Ok(true));
    let request = controller
        .stop_recording(capture)
        .expect("take should finalize")
        .expect("recording was active");
    assert_eq!(controller.status(), SessionStatus::Processing);
    let result = run_evaluation(evaluator, &request).await;
    assert!(controller.complete_evaluation(request.ticket, result));
}

#[tokio::test]
async fn first_attempt_then_retry_scores_against_previous_feedback() {
    let question = first_question();
    let mut controller = SessionController::new(question.clone());
    let mut capture = ToneCapture::new();
    let evaluator = ScriptedEvaluator::new(vec![Ok(feedback("6.0")), Ok(feedback("7.0"))]);

    record_and_evaluate(&mut controller, &mut capture, &evaluator).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Finished);
    assert_eq!(snapshot.feedback.as_ref().map(|f| f.band_score.as_str()), Some("6.0"));
    assert_eq!(snapshot.next_attempt, AttemptKind::Retry);

    record_and_evaluate(&mut controller, &mut capture, &evaluator).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.feedback.as_ref().map(|f| f.band_score.as_str()), Some("7.0"));
    assert_eq!(snapshot.history.len(), 2);

    assert_eq!(
        evaluator.calls(),
        vec![
            Call::First {
                question_text: question.text.clone()
            },
            Call::Retry {
                previous_band: "6.0".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn failed_attempts_surface_the_attempt_specific_message() {
    let mut controller = SessionController::new(first_question());
    let mut capture = ToneCapture::new();
    let evaluator = ScriptedEvaluator::new(vec![
        Err(EvaluationFailure::Transport("connection reset".to_string())),
        Ok(feedback("5.5")),
        Err(EvaluationFailure::MalformedReply("missing field".to_string())),
    ]);

    record_and_evaluate(&mut controller, &mut capture, &evaluator).await;
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert_eq!(controller.error(), Some(FIRST_ATTEMPT_MESSAGE));
    assert!(controller.history().is_empty());

    record_and_evaluate(&mut controller, &mut capture, &evaluator).await;
    assert_eq!(controller.status(), SessionStatus::Finished);
    assert_eq!(controller.error(), None);

    record_and_evaluate(&mut controller, &mut capture, &evaluator).await;
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert_eq!(controller.error(), Some(RETRY_ATTEMPT_MESSAGE));
    assert_eq!(controller.history().len(), 1);
    assert_eq!(controller.next_attempt(), AttemptKind::Retry);
}

#[tokio::test]
async fn switching_question_mid_evaluation_drops_the_late_result() {
    let mut controller = SessionController::new(first_question());
    let mut capture = ToneCapture::new();
    let evaluator = ScriptedEvaluator::new(vec![Ok(feedback("8.0"))]);

    assert_eq!(controller.start_recording(&mut capture), Ok(true));
    let request = controller
        .stop_recording(&mut capture)
        .expect("take should finalize")
        .expect("recording was active");

    let next = find_question("3").expect("catalog question");
    controller.select_question(next.clone(), &mut capture);

    let result = run_evaluation(&evaluator, &request).await;
    assert!(!controller.complete_evaluation(request.ticket, result));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.question, next);
    assert_eq!(snapshot.status, SessionStatus::Idle);
    assert!(snapshot.feedback.is_none());
    assert!(snapshot.history.is_empty());
}
