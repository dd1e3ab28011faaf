use serde::{Deserialize, Serialize};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder};
use thiserror::Error;
use tracing::error;

use crate::settings::Settings;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[allow(unused)] // needed for deserialization
    pub role: ChatRole,
    pub content: String,
}

#[derive(Deserialize)]
struct ChatResponseChoice {
    pub message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    pub choices: Vec<ChatResponseChoice>,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum ChatRole {
    System,
    Assistant,
    User,
}

/// The historical UI surfaced failures as fixed strings; they live on as the
/// `Display` renditions so callers can match on the variant instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("Error: Unable to complete the request.")]
    Transport,
    #[error("Error: Failed to parse the response.")]
    Parse,
}

#[derive(Debug, Clone, Copy)]
pub enum GptModel {
    Gpt35Turbo,
    Gpt35Turbo16k,
}

impl GptModel {
    fn api_name(self) -> &'static str {
        match self {
            Self::Gpt35Turbo => "gpt-3.5-turbo",
            Self::Gpt35Turbo16k => "gpt-3.5-turbo-16k",
        }
    }

    /// Sends `prompt` as a single user message and returns the first choice's
    /// content verbatim. The caller is responsible for checking that an API
    /// key is configured; an empty key fails here as a transport error.
    pub async fn complete(
        self,
        prompt: &str,
        settings: &Settings,
    ) -> Result<String, CompletionError> {
        self.complete_at(API_URL, prompt, settings).await
    }

    /// Request against a caller-provided endpoint (for testing).
    async fn complete_at(
        self,
        url: &str,
        prompt: &str,
        settings: &Settings,
    ) -> Result<String, CompletionError> {
        let client: Client = ClientBuilder::new()
            .timeout(settings.timeout())
            .build()
            .map_err(|err| {
                error!("failed to build the http client: {err}");
                CompletionError::Transport
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", settings.api_key)).map_err(|err| {
                error!("api key is not a valid header value: {err}");
                CompletionError::Transport
            })?,
        );

        let body = ChatRequest {
            model: self.api_name(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = client
            .post(url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                error!("chat completion request failed: {err}");
                CompletionError::Transport
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(%status, "chat completion returned a non-success status: {detail}");
            return Err(CompletionError::Transport);
        }

        let body = response.text().await.map_err(|err| {
            error!("failed to read the response body: {err}");
            CompletionError::Transport
        })?;
        parse_chat_response(&body)
    }
}

/// Extracts `choices[0].message.content` from a chat completion body, without
/// any trimming or markdown post-processing.
pub fn parse_chat_response(body: &str) -> Result<String, CompletionError> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|err| {
        error!("response body is not a valid chat completion: {err}");
        CompletionError::Parse
    })?;
    match response.choices.into_iter().next() {
        Some(choice) => Ok(choice.message.content),
        None => {
            error!("chat completion contained no choices");
            Err(CompletionError::Parse)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::{parse_chat_response, CompletionError, GptModel};
    use crate::settings::Settings;

    #[test]
    fn first_choice_content_is_returned_verbatim() {
        let body = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-3.5-turbo",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "  echo hello\n"}},
                {"index": 1, "message": {"role": "assistant", "content": "ignored"}}
            ]
        }"#;
        assert_eq!(parse_chat_response(body).unwrap(), "  echo hello\n");
    }

    #[test]
    fn empty_choices_is_a_parse_error() {
        let body = r#"{"choices": []}"#;
        assert_eq!(
            parse_chat_response(body).unwrap_err(),
            CompletionError::Parse
        );
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        assert_eq!(
            parse_chat_response("not json").unwrap_err(),
            CompletionError::Parse
        );
    }

    #[tokio::test]
    async fn non_success_status_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(
                b"HTTP/1.1 500 Internal Server Error\r\n\
                  content-length: 0\r\n\
                  connection: close\r\n\r\n",
            );
        });

        let settings = Settings {
            api_key: "sk-test".to_string(),
            timeout_seconds: 5,
        };
        let result = GptModel::Gpt35Turbo
            .complete_at(&format!("http://{addr}/v1/chat/completions"), "task", &settings)
            .await;
        assert_eq!(result.unwrap_err(), CompletionError::Transport);
        server.join().unwrap();
    }

    #[test]
    fn error_display_matches_the_historical_sentinels() {
        assert_eq!(
            CompletionError::Transport.to_string(),
            "Error: Unable to complete the request."
        );
        assert_eq!(
            CompletionError::Parse.to_string(),
            "Error: Failed to parse the response."
        );
    }
}
