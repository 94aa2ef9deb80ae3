// Completion endpoint - OpenAI-compatible chat completions
//
// The extraction core only needs "prompt in, text out"; the provider trait is
// the seam that lets tests (and other endpoints) stand in for the real API.

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// One completion call: a single user message.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Return the text content of the first choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Build the fixed prompt for a statement's text.
pub fn build_prompt(text: &str) -> String {
    format!(
        r#"
A partir del siguiente texto de un estado de cuenta en español, realiza lo siguiente:

1. Extrae los siguientes datos si están presentes:
- Nombre completo
- RFC
- Número de cuenta
- Saldo total al corte (busca explícitamente esta frase o sus componentes aunque estén separados)
- Tema general del documento

2. Después de leer y analizar todo el contenido, identifica posibles **riesgos financieros** y sugiere **recomendaciones**.

Devuelve todo en formato JSON con estas claves exactas:
nombre, rfc, cuenta, saldo, tema, riesgos, recomendaciones

Texto:
{}
"#,
        text
    )
}

// ============================================================================
// OPENAI PROVIDER
// ============================================================================

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let start = Instant::now();

        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(request.prompt.clone()),
            }],
            temperature: request.temperature,
        };

        debug!(model = %request.model, prompt_chars = request.prompt.len(), "Sending completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("OpenAI HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI returned {}: {}", status, error_body);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .context("OpenAI returned no choices")?
            .message
            .content
            .unwrap_or_default();

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            response_chars = content.len(),
            "Completion received"
        );

        Ok(content)
    }
}

// ============================================================================
// TEST PROVIDER
// ============================================================================

/// Returns a fixed reply and remembers the last prompt it saw.
#[cfg(test)]
pub(crate) struct CannedProvider {
    reply: Result<String, String>,
    pub last_prompt: std::sync::Mutex<Option<String>>,
}

#[cfg(test)]
impl CannedProvider {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            last_prompt: std::sync::Mutex::new(None),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            last_prompt: std::sync::Mutex::new(None),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl CompletionProvider for CannedProvider {
    fn name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        *self.last_prompt.lock().unwrap() = Some(request.prompt.clone());
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(message) => Err(anyhow::anyhow!(message.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_exact_keys() {
        let prompt = build_prompt("SALDO AL CORTE $1,000.00");
        assert!(prompt.contains("nombre, rfc, cuenta, saldo, tema, riesgos, recomendaciones"));
        assert!(prompt.contains("Saldo total al corte"));
    }

    #[test]
    fn test_prompt_template_is_fixed() {
        let expected = "
A partir del siguiente texto de un estado de cuenta en español, realiza lo siguiente:

1. Extrae los siguientes datos si están presentes:
- Nombre completo
- RFC
- Número de cuenta
- Saldo total al corte (busca explícitamente esta frase o sus componentes aunque estén separados)
- Tema general del documento

2. Después de leer y analizar todo el contenido, identifica posibles **riesgos financieros** y sugiere **recomendaciones**.

Devuelve todo en formato JSON con estas claves exactas:
nombre, rfc, cuenta, saldo, tema, riesgos, recomendaciones

Texto:
BANCO X
";
        assert_eq!(build_prompt("BANCO X"), expected);
        assert!(!build_prompt("").contains("No encontrado"));
    }

    #[test]
    fn test_prompt_ends_with_statement_text() {
        let prompt = build_prompt("Estado de cuenta\nCliente: JUAN PEREZ");
        let (_, tail) = prompt.split_once("Texto:\n").unwrap();
        assert_eq!(tail.trim_end(), "Estado de cuenta\nCliente: JUAN PEREZ");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider = OpenAiProvider::new("sk-test").with_base_url("http://localhost:8080/v1/");
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_chat_response_deserializes() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"{\"nombre\":\"X\"}"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("{\"nombre\":\"X\"}"));
    }

    #[tokio::test]
    async fn test_canned_provider_records_prompt() {
        let provider = CannedProvider::replying("{}");
        let request = CompletionRequest {
            model: DEFAULT_MODEL.to_string(),
            prompt: "hola".to_string(),
            temperature: DEFAULT_TEMPERATURE,
        };
        assert_eq!(provider.complete(&request).await.unwrap(), "{}");
        assert_eq!(provider.last_prompt.lock().unwrap().as_deref(), Some("hola"));
    }
}
