//! Vibe classification adapter: free text in, closed-vocabulary tags out.
//!
//! This boundary never raises. Any failure (missing key, HTTP error,
//! unparseable model output) degrades to an empty vibe list.

use crate::config::VibeConfig;
use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub trait VibeClassifier: Send + Sync {
    /// Pick the vibes from `allowed` that best describe `texts`.
    /// Returns lowercase names drawn from `allowed`; empty on any failure.
    fn classify(&self, texts: &[String], allowed: &[String]) -> Vec<String>;
}

/// LLM-backed classifier speaking the OpenAI-compatible chat-completions
/// protocol (Groq and friends).
pub struct LlmVibeClassifier {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_vibes: usize,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmVibeClassifier {
    pub fn new(config: &VibeConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            log::warn!(
                "no vibe api key in ${}, vibe classification will return empty",
                config.api_key_env
            );
        }

        Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_vibes: config.max_vibes,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn build_prompt(&self, texts: &[String], allowed: &[String]) -> String {
        format!(
            "You are an AI that returns only a JSON array of strings.\n\n\
             Given this closed list of fashion vibes:\n{}\n\n\
             And the following content (hashtags, caption, transcript):\n\
             -----\n{}\n-----\n\n\
             Return the most relevant vibes from the list above as a JSON \
             array of strings, at most {} entries. No other text, no \
             explanations, only the array.",
            allowed.join(", "),
            texts.join("\n"),
            self.max_vibes
        )
    }

    fn classify_inner(&self, texts: &[String], allowed: &[String]) -> anyhow::Result<Vec<String>> {
        let Some(api_key) = &self.api_key else {
            bail!("vibe api key not configured");
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;

        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": self.build_prompt(texts, allowed)}],
            "max_tokens": 50,
            "temperature": 0.2,
        });

        let response = client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .context("vibe classification request failed")?
            .error_for_status()?;

        let parsed: ChatResponse = response.json().context("malformed chat response")?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        log::debug!("vibe llm response: {content}");
        parse_vibe_list(content)
    }
}

impl VibeClassifier for LlmVibeClassifier {
    fn classify(&self, texts: &[String], allowed: &[String]) -> Vec<String> {
        if texts.iter().all(|t| t.trim().is_empty()) || allowed.is_empty() {
            return vec![];
        }

        let raw = match self.classify_inner(texts, allowed) {
            Ok(vibes) => vibes,
            Err(err) => {
                log::error!("vibe classification failed: {err}");
                return vec![];
            }
        };

        filter_vibes(raw, allowed, self.max_vibes)
    }
}

/// Parse the model's reply as a JSON array of strings, tolerating a fenced
/// code block around it.
pub fn parse_vibe_list(content: &str) -> anyhow::Result<Vec<String>> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(trimmed).context("vibe reply is not a JSON string array")
}

/// Keep only names present in the allowed vocabulary (case-insensitive),
/// lowercase them, drop duplicates, cap the count.
pub fn filter_vibes(raw: Vec<String>, allowed: &[String], max_vibes: usize) -> Vec<String> {
    let mut vibes = Vec::new();
    for name in raw {
        let known = allowed.iter().any(|a| a.eq_ignore_ascii_case(&name));
        if !known {
            continue;
        }
        let lower = name.to_lowercase();
        if !vibes.contains(&lower) {
            vibes.push(lower);
        }
        if vibes.len() == max_vibes {
            break;
        }
    }
    vibes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        ["Coquette", "Clean Girl", "Cottagecore", "Streetcore", "Y2K"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_parse_plain_array() {
        let vibes = parse_vibe_list(r#"["Coquette", "Y2K"]"#).unwrap();
        assert_eq!(vibes, vec!["Coquette", "Y2K"]);
    }

    #[test]
    fn test_parse_fenced_array() {
        let vibes = parse_vibe_list("```json\n[\"Boho\"]\n```").unwrap();
        assert_eq!(vibes, vec!["Boho"]);
    }

    #[test]
    fn test_parse_prose_reply_fails() {
        assert!(parse_vibe_list("The vibes are Coquette and Y2K").is_err());
    }

    #[test]
    fn test_filter_drops_unknown_and_lowercases() {
        let raw = vec![
            "Coquette".to_string(),
            "Grunge".to_string(),
            "y2k".to_string(),
        ];
        assert_eq!(filter_vibes(raw, &allowed(), 3), vec!["coquette", "y2k"]);
    }

    #[test]
    fn test_filter_dedupes_and_caps() {
        let raw = vec![
            "Coquette".to_string(),
            "coquette".to_string(),
            "Y2K".to_string(),
            "Streetcore".to_string(),
            "Cottagecore".to_string(),
        ];
        assert_eq!(
            filter_vibes(raw, &allowed(), 3),
            vec!["coquette", "y2k", "streetcore"]
        );
    }
}
