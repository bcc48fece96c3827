use serde::{Deserialize, Deserializer, Serialize};

use crate::error::EvaluationFailure;

pub const EXPECTED_SUGGESTIONS: usize = 3;

/// Examiner feedback for one recorded answer. Field names are the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub transcription: String,
    #[serde(deserialize_with = "band_from_text_or_number")]
    pub band_score: String,
    pub fluency: String,
    pub vocabulary: String,
    pub grammar: String,
    pub improved_version: String,
    pub suggestions: Vec<String>,
}

impl Feedback {
    /// Numeric band when the model returned a plain numeral on the 0 to 9
    /// scale in half-band steps, such as "6.5".
    pub fn band_value(&self) -> Option<f32> {
        self.band_score
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|value| (0.0..=9.0).contains(value) && (value * 2.0).fract() == 0.0)
    }
}

/// Some model replies carry the band as a JSON number; keep its text form.
fn band_from_text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Band {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Band::deserialize(deserializer)? {
        Band::Text(text) => text,
        Band::Number(number) => number.to_string(),
    })
}

pub fn parse_feedback(reply: &str) -> Result<Feedback, EvaluationFailure> {
    let body = strip_code_fence(reply.trim());
    if body.is_empty() {
        return Err(EvaluationFailure::EmptyReply);
    }

    let feedback = serde_json::from_str::<Feedback>(body)
        .map_err(|error| EvaluationFailure::MalformedReply(error.to_string()))?;

    if feedback.suggestions.len() != EXPECTED_SUGGESTIONS {
        log::warn!(
            "model returned {} suggestions, expected {}",
            feedback.suggestions.len(),
            EXPECTED_SUGGESTIONS
        );
    }

    if feedback.band_value().is_none() {
        log::warn!(
            "model returned band {:?}, expected 0-9 in half-band steps",
            feedback.band_score
        );
    }

    Ok(feedback)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
