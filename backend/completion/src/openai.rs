use anyhow::anyhow;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Maximum number of tokens the model accepts across prompt and
/// completion. Token-denominated and stricter than the character
/// budget used when trimming history; the two are correlated but
/// distinct measures.
pub const MAX_PROMPT_LENGTH: usize = 4096;

/// Response body fragment OpenAI returns when the prompt was too long.
const ERR_BODY_COMPLETION_MAX_LENGTH: &str = "Please reduce your prompt; or completion length";

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/completions";

#[derive(Debug, Error)]
pub enum CompletionError {
    /// The prompt, together with the requested completion length,
    /// exceeded the model's maximum token length. Recoverable by
    /// reducing the prompt.
    #[error("prompt too long for the completion model")]
    PromptTooLong,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// API client for OpenAI text completions.
pub struct OpenAiCompletions {
    api_key: String,
    model: String,
    client: Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

impl OpenAiCompletions {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "text-davinci-003".to_string(),
            client: Client::new(),
        }
    }

    /// Complete `prompt` with the model. Returns `None` when the model
    /// produced no non-empty completion.
    pub async fn create_completion(
        &self,
        prompt: &str,
    ) -> Result<Option<String>, CompletionError> {
        let body = CompletionRequest {
            model: &self.model,
            prompt,
            temperature: 0.7,
            max_tokens: 2048,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        };

        let resp = self
            .client
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Other(e.into()))?;

        if resp.status() == StatusCode::BAD_REQUEST {
            let text = resp
                .text()
                .await
                .map_err(|e| CompletionError::Other(e.into()))?;
            if text.contains(ERR_BODY_COMPLETION_MAX_LENGTH) {
                return Err(CompletionError::PromptTooLong);
            }
            return Err(CompletionError::Other(anyhow!(
                "completion request rejected: {text}"
            )));
        }

        let parsed: CompletionResponse = resp
            .error_for_status()
            .map_err(|e| CompletionError::Other(e.into()))?
            .json()
            .await
            .map_err(|e| CompletionError::Other(e.into()))?;

        debug!(choices = parsed.choices.len(), "completion response received");
        Ok(first_non_empty(parsed.choices))
    }
}

/// Text of the first choice with a non-empty body, if any.
fn first_non_empty(choices: Vec<CompletionChoice>) -> Option<String> {
    choices.into_iter().map(|c| c.text).find(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing_takes_first_non_empty_choice() {
        let parsed: CompletionResponse = serde_json::from_str(
            r#"{"choices": [{"text": ""}, {"text": "hello there"}, {"text": "later"}]}"#,
        )
        .unwrap();
        assert_eq!(
            first_non_empty(parsed.choices),
            Some("hello there".to_string())
        );
    }

    #[test]
    fn test_all_empty_choices_yield_none() {
        let parsed: CompletionResponse =
            serde_json::from_str(r#"{"choices": [{"text": ""}, {"text": ""}]}"#).unwrap();
        assert_eq!(first_non_empty(parsed.choices), None);
    }

    #[test]
    fn test_no_choices_yield_none() {
        let parsed: CompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert_eq!(first_non_empty(parsed.choices), None);
    }
}
