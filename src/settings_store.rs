use crate::config::{CoachSettings, QuestionOrder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const APP_DIR_NAME: &str = "ielts-speaking-coach";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoachSettingsPatch {
    pub model: Option<String>,
    pub api_base_url: Option<String>,
    pub feedback_language: Option<String>,
    pub microphone_id: Option<Option<String>>,
    pub question_order: Option<QuestionOrder>,
    pub request_timeout_secs: Option<Option<u64>>,
}

pub fn app_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(APP_DIR_NAME)
}

pub fn default_settings_path() -> PathBuf {
    app_dir().join("settings.json")
}

pub fn load_or_default(path: &Path) -> CoachSettings {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str::<CoachSettings>(&contents).unwrap_or_else(|error| {
            log::warn!("ignoring unreadable settings at {}: {error}", path.display());
            CoachSettings::default()
        }),
        Err(_) => CoachSettings::default(),
    }
}

pub fn save(path: &Path, settings: &CoachSettings) -> Result<(), String> {
    let parent = path
        .parent()
        .ok_or_else(|| "settings path has no parent directory".to_string())?;
    fs::create_dir_all(parent).map_err(io_to_string)?;
    let contents = serde_json::to_string_pretty(settings).map_err(|error| error.to_string())?;
    fs::write(path, contents).map_err(io_to_string)
}

pub fn apply_patch(settings: &CoachSettings, patch: CoachSettingsPatch) -> CoachSettings {
    CoachSettings {
        model: non_blank(patch.model).unwrap_or_else(|| settings.model.clone()),
        api_base_url: non_blank(patch.api_base_url)
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| settings.api_base_url.clone()),
        feedback_language: non_blank(patch.feedback_language)
            .unwrap_or_else(|| settings.feedback_language.clone()),
        microphone_id: patch
            .microphone_id
            .map(non_blank)
            .unwrap_or_else(|| settings.microphone_id.clone()),
        question_order: patch.question_order.unwrap_or(settings.question_order),
        request_timeout_secs: patch
            .request_timeout_secs
            .map(|value| value.filter(|secs| *secs > 0))
            .unwrap_or(settings.request_timeout_secs),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn io_to_string(error: io::Error) -> String {
    error.to_string()
}
