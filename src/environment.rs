use serde::Serialize;

pub const API_KEY_ENV_NAMES: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Ready,
    NeedsSetup,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentHealth {
    pub os: String,
    pub api_key: ReadinessState,
    pub api_key_source: Option<String>,
    pub microphone: ReadinessState,
    pub notes: Vec<String>,
}

/// First non-blank key among `API_KEY_ENV_NAMES`, with the variable it came from.
pub fn resolve_api_key<F>(lookup: F) -> Option<(&'static str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    API_KEY_ENV_NAMES.iter().find_map(|name| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| (*name, value))
    })
}

pub fn api_key_from_env() -> Option<String> {
    resolve_api_key(|name| std::env::var(name).ok()).map(|(_, key)| key)
}

/// `microphone_count` is `None` when devices could not be enumerated.
pub fn build_environment_health(
    os: &str,
    api_key_source: Option<&str>,
    microphone_count: Option<usize>,
) -> EnvironmentHealth {
    let mut notes = Vec::new();

    let api_key = match api_key_source {
        Some(_) => ReadinessState::Ready,
        None => {
            notes.push(format!(
                "Set {} (or add it to a .env file) to enable answer evaluation.",
                API_KEY_ENV_NAMES.join(" or ")
            ));
            ReadinessState::NeedsSetup
        }
    };

    let microphone = match microphone_count {
        Some(0) => {
            notes.push("No input microphone detected; connect one to record answers.".to_string());
            ReadinessState::NeedsSetup
        }
        Some(_) => ReadinessState::Ready,
        None => {
            notes.push("Microphone devices could not be listed on this system.".to_string());
            ReadinessState::Unknown
        }
    };

    if os == "macos" && microphone != ReadinessState::NeedsSetup {
        notes.push(
            "macOS asks for microphone permission on the first recording; recording fails until it is granted."
                .to_string(),
        );
    }

    EnvironmentHealth {
        os: os.to_string(),
        api_key,
        api_key_source: api_key_source.map(str::to_string),
        microphone,
        notes,
    }
}

#[cfg(feature = "desktop")]
pub fn detect_environment_health() -> EnvironmentHealth {
    let source = resolve_api_key(|name| std::env::var(name).ok()).map(|(name, _)| name);
    let microphone_count = crate::audio::list_input_microphones()
        .ok()
        .map(|microphones| microphones.len());
    build_environment_health(std::env::consts::OS, source, microphone_count)
}
