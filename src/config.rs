use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_FEEDBACK_LANGUAGE: &str = "Vietnamese";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionOrder {
    Random,
    Sequential,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoachSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_feedback_language")]
    pub feedback_language: String,
    #[serde(default)]
    pub microphone_id: Option<String>,
    #[serde(default = "default_question_order")]
    pub question_order: QuestionOrder,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_feedback_language() -> String {
    DEFAULT_FEEDBACK_LANGUAGE.to_string()
}

fn default_question_order() -> QuestionOrder {
    QuestionOrder::Random
}

impl Default for CoachSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base_url: default_api_base_url(),
            feedback_language: default_feedback_language(),
            microphone_id: None,
            question_order: default_question_order(),
            request_timeout_secs: None,
        }
    }
}
