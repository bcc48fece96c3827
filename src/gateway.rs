use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::audio::AudioPayload;
use crate::config::CoachSettings;
use crate::error::{AttemptKind, EvaluationError, EvaluationFailure};
use crate::feedback::{parse_feedback, Feedback};

pub const API_KEY_HEADER: &str = "x-goog-api-key";
const JSON_MIME_TYPE: &str = "application/json";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Scores recorded answers. Both operations are stateless between calls.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        audio: &AudioPayload,
        question_text: &str,
    ) -> impl Future<Output = Result<Feedback, EvaluationError>> + Send;

    /// Scores a re-read of `previous.improved_version`.
    fn evaluate_retry(
        &self,
        previous: &Feedback,
        audio: &AudioPayload,
    ) -> impl Future<Output = Result<Feedback, EvaluationError>> + Send;

    fn label(&self) -> String {
        "unknown".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationTarget {
    FirstAttempt { question_text: String },
    Retry { previous: Feedback },
}

impl EvaluationTarget {
    pub fn attempt_kind(&self) -> AttemptKind {
        match self {
            EvaluationTarget::FirstAttempt { .. } => AttemptKind::FirstAttempt,
            EvaluationTarget::Retry { .. } => AttemptKind::Retry,
        }
    }
}

/// Produced by the session when a take is finalized; `ticket` ties the
/// eventual result back to the attempt that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub ticket: u64,
    pub audio: AudioPayload,
    pub target: EvaluationTarget,
}

pub async fn run_evaluation<E: Evaluator>(
    evaluator: &E,
    request: &EvaluationRequest,
) -> Result<Feedback, EvaluationError> {
    match &request.target {
        EvaluationTarget::FirstAttempt { question_text } => {
            evaluator.evaluate(&request.audio, question_text).await
        }
        EvaluationTarget::Retry { previous } => {
            evaluator.evaluate_retry(previous, &request.audio).await
        }
    }
}

pub fn system_instruction(feedback_language: &str) -> String {
    format!(
        r#"You are an expert IELTS Speaking Examiner. Your goal is to help students improve their speaking skills.
When a student provides an audio response (transcribed), you must:
1. Provide the exact transcription of their words.
2. Estimate a Band Score (0-9).
3. Evaluate Fluency, Lexical Resource (Vocabulary), and Grammatical Range & Accuracy.
4. Provide a much better, native-like "Improved Version" of their answer.
5. List 3 specific bullet points for improvement.

CRITICAL: Return the response strictly in JSON format matching this structure:
{{
  "transcription": "the text you heard",
  "bandScore": "7.0",
  "fluency": "Your fluency was good but...",
  "vocabulary": "Try using more academic words like...",
  "grammar": "Be careful with past tense...",
  "improvedVersion": "Actually, I would say...",
  "suggestions": ["suggestion 1", "suggestion 2", "suggestion 3"]
}}
Respond in {feedback_language} for the feedback sections, but keep the improvedVersion in natural English."#
    )
}

pub fn first_attempt_prompt(question_text: &str) -> String {
    format!("Question was: \"{question_text}\". Please evaluate my audio response.")
}

pub fn retry_prompt(previous: &Feedback) -> String {
    format!(
        "I tried to repeat the 'Improved Version' you suggested: \"{}\". How did I do? Compare my new audio with your suggestion and give me updated feedback.",
        previous.improved_version
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<AudioPayload>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn audio(audio: &AudioPayload) -> Self {
        Self {
            text: None,
            inline_data: Some(audio.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_mime_type: String,
    pub response_schema: serde_json::Value,
}

/// Every feedback field is requested as a string, suggestions as a string array.
pub fn feedback_response_schema() -> serde_json::Value {
    let text = serde_json::json!({ "type": "STRING" });
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "transcription": text,
            "bandScore": text,
            "fluency": text,
            "vocabulary": text,
            "grammar": text,
            "improvedVersion": text,
            "suggestions": { "type": "ARRAY", "items": text },
        },
        "required": [
            "transcription",
            "bandScore",
            "fluency",
            "vocabulary",
            "grammar",
            "improvedVersion",
            "suggestions",
        ],
    })
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub system_instruction: Content,
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

pub fn build_request(
    system_instruction: &str,
    audio: &AudioPayload,
    prompt: &str,
) -> GenerateContentRequest {
    GenerateContentRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part::text(system_instruction)],
        },
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part::audio(audio), Part::text(prompt)],
        }],
        generation_config: GenerationConfig {
            response_mime_type: JSON_MIME_TYPE.to_string(),
            response_schema: feedback_response_schema(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

/// Concatenated text parts of the first candidate.
pub fn reply_text(response: &GenerateContentResponse) -> Result<String, EvaluationFailure> {
    let candidate = response
        .candidates
        .first()
        .ok_or(EvaluationFailure::EmptyReply)?;

    let text = candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        if let Some(reason) = &candidate.finish_reason {
            log::warn!("model returned no text, finish reason {reason}");
        }
        return Err(EvaluationFailure::EmptyReply);
    }

    Ok(text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_base_url: String,
    pub feedback_language: String,
    pub request_timeout: Option<Duration>,
}

impl GeminiConfig {
    pub fn from_settings(settings: &CoachSettings, api_key: String) -> Self {
        Self {
            api_key,
            model: settings.model.clone(),
            api_base_url: settings.api_base_url.clone(),
            feedback_language: settings.feedback_language.clone(),
            request_timeout: settings.request_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Clone)]
pub struct GeminiEvaluator {
    config: GeminiConfig,
    client: Client,
    system_instruction: String,
}

impl GeminiEvaluator {
    pub fn new(config: GeminiConfig) -> Result<Self, EvaluationFailure> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|error| EvaluationFailure::Transport(error.to_string()))?;

        Ok(Self {
            system_instruction: system_instruction(&config.feedback_language),
            config,
            client,
        })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn generate(
        &self,
        attempt: AttemptKind,
        audio: &AudioPayload,
        prompt: &str,
    ) -> Result<Feedback, EvaluationError> {
        let request = build_request(&self.system_instruction, audio, prompt);
        log::info!(
            "sending {:?} to model {} ({} base64 bytes)",
            attempt,
            self.config.model,
            audio.data.len()
        );

        let result = match self.send(&request).await {
            Ok(text) => parse_feedback(&text),
            Err(cause) => Err(cause),
        };

        result.map_err(|cause| {
            log::error!("evaluation failed: {cause}");
            EvaluationError::new(attempt, cause)
        })
    }

    async fn send(&self, request: &GenerateContentRequest) -> Result<String, EvaluationFailure> {
        let response = self
            .client
            .post(self.config.endpoint())
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|error| EvaluationFailure::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EvaluationFailure::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|error| EvaluationFailure::MalformedReply(error.to_string()))?;
        reply_text(&parsed)
    }
}

impl Evaluator for GeminiEvaluator {
    async fn evaluate(
        &self,
        audio: &AudioPayload,
        question_text: &str,
    ) -> Result<Feedback, EvaluationError> {
        self.generate(
            AttemptKind::FirstAttempt,
            audio,
            &first_attempt_prompt(question_text),
        )
        .await
    }

    async fn evaluate_retry(
        &self,
        previous: &Feedback,
        audio: &AudioPayload,
    ) -> Result<Feedback, EvaluationError> {
        self.generate(AttemptKind::Retry, audio, &retry_prompt(previous))
            .await
    }

    fn label(&self) -> String {
        format!("gemini ({})", self.config.model)
    }
}

#[derive(Clone)]
pub enum RuntimeEvaluator {
    Unavailable { reason: String },
    Gemini(GeminiEvaluator),
}

impl RuntimeEvaluator {
    pub fn is_ready(&self) -> bool {
        matches!(self, RuntimeEvaluator::Gemini(_))
    }

    pub fn description(&self) -> String {
        match self {
            RuntimeEvaluator::Unavailable { reason } => format!("unavailable: {reason}"),
            RuntimeEvaluator::Gemini(evaluator) => {
                format!("{} at {}", evaluator.label(), evaluator.config().endpoint())
            }
        }
    }

    fn unavailable(reason: &str, attempt: AttemptKind) -> EvaluationError {
        EvaluationError::new(attempt, EvaluationFailure::Unavailable(reason.to_string()))
    }
}

impl Evaluator for RuntimeEvaluator {
    async fn evaluate(
        &self,
        audio: &AudioPayload,
        question_text: &str,
    ) -> Result<Feedback, EvaluationError> {
        match self {
            RuntimeEvaluator::Unavailable { reason } => {
                Err(Self::unavailable(reason, AttemptKind::FirstAttempt))
            }
            RuntimeEvaluator::Gemini(evaluator) => evaluator.evaluate(audio, question_text).await,
        }
    }

    async fn evaluate_retry(
        &self,
        previous: &Feedback,
        audio: &AudioPayload,
    ) -> Result<Feedback, EvaluationError> {
        match self {
            RuntimeEvaluator::Unavailable { reason } => {
                Err(Self::unavailable(reason, AttemptKind::Retry))
            }
            RuntimeEvaluator::Gemini(evaluator) => {
                evaluator.evaluate_retry(previous, audio).await
            }
        }
    }

    fn label(&self) -> String {
        match self {
            RuntimeEvaluator::Unavailable { .. } => "unavailable".to_string(),
            RuntimeEvaluator::Gemini(evaluator) => evaluator.label(),
        }
    }
}

pub fn build_runtime_evaluator(settings: &CoachSettings, api_key: Option<String>) -> RuntimeEvaluator {
    let Some(api_key) = api_key.filter(|key| !key.trim().is_empty()) else {
        return RuntimeEvaluator::Unavailable {
            reason: "no API key found; set GEMINI_API_KEY or API_KEY".to_string(),
        };
    };

    match GeminiEvaluator::new(GeminiConfig::from_settings(settings, api_key)) {
        Ok(evaluator) => RuntimeEvaluator::Gemini(evaluator),
        Err(error) => RuntimeEvaluator::Unavailable {
            reason: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    const FEEDBACK_JSON: &str = r#"{"transcription":"I live in Hue","bandScore":"6.5","fluency":"Ổn","vocabulary":"Khá","grammar":"Tốt","improvedVersion":"I currently live in Hue, the former imperial capital.","suggestions":["a","b","c"]}"#;

    fn audio() -> AudioPayload {
        AudioPayload {
            mime_type: "audio/wav".to_string(),
            data: "UklGRg==".to_string(),
        }
    }

    fn sample_feedback() -> Feedback {
        parse_feedback(FEEDBACK_JSON).expect("fixture should parse")
    }

    fn config(base_url: &str) -> GeminiConfig {
        GeminiConfig {
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            api_base_url: base_url.to_string(),
            feedback_language: "Vietnamese".to_string(),
            request_timeout: Some(Duration::from_secs(5)),
        }
    }

    fn model_reply(text: &str) -> String {
        serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }]
        })
        .to_string()
    }

    /// Serves one canned HTTP response and hands back the raw request.
    fn serve_once(status_line: &'static str, body: String) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let address = listener.local_addr().expect("listener should have an address");
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("client should connect");
            let mut raw = Vec::new();
            let mut buffer = [0u8; 4096];
            loop {
                let read = stream.read(&mut buffer).expect("request should be readable");
                if read == 0 {
                    break;
                }
                raw.extend_from_slice(&buffer[..read]);
                if request_complete(&raw) {
                    break;
                }
            }
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream
                .write_all(response.as_bytes())
                .expect("response should be written");
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{address}"), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        raw.len() >= header_end + 4 + content_length
    }

    #[test]
    fn request_carries_instruction_audio_and_prompt() {
        let request = build_request("be an examiner", &audio(), "Question was: \"Q\".");
        let value = serde_json::to_value(&request).expect("request should serialize");

        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be an examiner");
        assert!(value["systemInstruction"].get("role").is_none());
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(
            value["contents"][0]["parts"][0]["inlineData"]["mimeType"],
            "audio/wav"
        );
        assert_eq!(value["contents"][0]["parts"][0]["inlineData"]["data"], "UklGRg==");
        assert!(value["contents"][0]["parts"][0].get("text").is_none());
        assert_eq!(value["contents"][0]["parts"][1]["text"], "Question was: \"Q\".");
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
        let schema = &value["generationConfig"]["responseSchema"];
        assert_eq!(schema["properties"]["bandScore"]["type"], "STRING");
        assert_eq!(schema["properties"]["suggestions"]["items"]["type"], "STRING");
        assert_eq!(schema["required"].as_array().map(Vec::len), Some(7));
    }

    #[test]
    fn prompts_reference_question_and_improved_version() {
        assert_eq!(
            first_attempt_prompt("Where is your hometown?"),
            "Question was: \"Where is your hometown?\". Please evaluate my audio response."
        );
        let retry = retry_prompt(&sample_feedback());
        assert!(retry.contains("\"I currently live in Hue, the former imperial capital.\""));
        assert!(retry.starts_with("I tried to repeat the 'Improved Version'"));
    }

    #[test]
    fn system_instruction_names_schema_and_language() {
        let instruction = system_instruction("Vietnamese");
        assert!(instruction.contains("\"improvedVersion\""));
        assert!(instruction.contains("\"suggestions\": [\"suggestion 1\""));
        assert!(instruction.contains("Respond in Vietnamese for the feedback sections"));
        assert!(!instruction.contains("{{"));
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let config = config("https://example.test/");
        assert_eq!(
            config.endpoint(),
            "https://example.test/v1beta/models/test-model:generateContent"
        );
    }

    #[test]
    fn reply_text_joins_parts_of_first_candidate() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":"1}"}]}},{"content":{"parts":[{"text":"ignored"}]}}]}"#,
        )
        .expect("response should deserialize");
        assert_eq!(reply_text(&response).expect("text should be present"), "{\"a\":1}");
    }

    #[test]
    fn reply_without_candidates_is_empty() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
                .expect("response should deserialize");
        assert_eq!(reply_text(&response), Err(EvaluationFailure::EmptyReply));
    }

    #[test]
    fn missing_api_key_yields_unavailable_runtime() {
        let settings = CoachSettings::default();
        assert!(!build_runtime_evaluator(&settings, None).is_ready());
        assert!(!build_runtime_evaluator(&settings, Some("  ".to_string())).is_ready());

        let ready = build_runtime_evaluator(&settings, Some("key".to_string()));
        assert!(ready.is_ready());
        assert!(ready.description().contains("gemini-3-flash-preview"));
    }

    #[tokio::test]
    async fn unavailable_runtime_fails_with_attempt_message() {
        let runtime = RuntimeEvaluator::Unavailable {
            reason: "no key".to_string(),
        };
        let error = runtime
            .evaluate_retry(&sample_feedback(), &audio())
            .await
            .expect_err("unavailable evaluator should fail");
        assert_eq!(error.attempt, AttemptKind::Retry);
        assert_eq!(error.to_string(), "Failed to correct your practice attempt.");
        assert_eq!(error.cause, EvaluationFailure::Unavailable("no key".to_string()));
    }

    #[tokio::test]
    async fn gemini_evaluator_posts_request_and_parses_feedback() {
        let (base_url, server) = serve_once("HTTP/1.1 200 OK", model_reply(FEEDBACK_JSON));
        let evaluator = GeminiEvaluator::new(config(&base_url)).expect("client should build");

        let feedback = evaluator
            .evaluate(&audio(), "Where do you live?")
            .await
            .expect("evaluation should succeed");
        assert_eq!(feedback, sample_feedback());

        let raw_request = server.join().expect("server thread should finish");
        assert!(raw_request.starts_with("POST /v1beta/models/test-model:generateContent"));
        assert!(raw_request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
        assert!(raw_request.contains("Question was: \\\"Where do you live?\\\""));
    }

    #[tokio::test]
    async fn gemini_evaluator_reports_http_errors() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 503 Service Unavailable",
            r#"{"error":{"message":"overloaded"}}"#.to_string(),
        );
        let evaluator = GeminiEvaluator::new(config(&base_url)).expect("client should build");

        let error = evaluator
            .evaluate(&audio(), "Where do you live?")
            .await
            .expect_err("503 should fail");
        assert_eq!(error.attempt, AttemptKind::FirstAttempt);
        match error.cause {
            EvaluationFailure::Status { status, body } => {
                assert_eq!(status, 503);
                assert!(body.contains("overloaded"));
            }
            other => panic!("unexpected failure: {other:?}"),
        }
        let _ = server.join();
    }

    #[tokio::test]
    async fn gemini_evaluator_rejects_non_feedback_reply() {
        let (base_url, server) = serve_once("HTTP/1.1 200 OK", model_reply("I could not hear you."));
        let evaluator = GeminiEvaluator::new(config(&base_url)).expect("client should build");

        let error = run_evaluation(
            &evaluator,
            &EvaluationRequest {
                ticket: 1,
                audio: audio(),
                target: EvaluationTarget::Retry {
                    previous: sample_feedback(),
                },
            },
        )
        .await
        .expect_err("prose reply should fail");
        assert_eq!(error.attempt, AttemptKind::Retry);
        assert!(matches!(error.cause, EvaluationFailure::MalformedReply(_)));
        let _ = server.join();
    }
}
