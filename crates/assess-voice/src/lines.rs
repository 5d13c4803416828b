//! What the agent says.
//!
//! Conversational lines (greeting, transitions, confirmations) are generated
//! by the text-generation endpoint when one is configured. Generation never
//! blocks the flow: any failure falls back to a fixed phrase. Question text
//! itself is always read verbatim.

use crate::backend::BackendClient;
use crate::error::VoiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Token budget for a single generated line.
const LINE_MAX_TOKENS: u32 = 120;

/// Kinds of agent line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    Greeting,
    NamePreference,
    NameRetry,
    QuestionIntro,
    Transition,
    Confirmation,
    FollowupPrompt,
}

/// Facts available when composing a line.
#[derive(Debug, Clone, Default)]
pub struct LineContext {
    pub persona_name: String,
    /// Name to address the user by, once known.
    pub user_name: Option<String>,
    pub question: Option<String>,
    pub name_candidates: Vec<String>,
}

/// Free-text generation collaborator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, VoiceError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_prompt: &'a str,
    user_prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: Option<String>,
}

/// Generator backed by `POST /api/ai/generate`.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: BackendClient,
}

impl HttpGenerator {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, VoiceError> {
        let response: GenerateResponse = self
            .client
            .post_json(
                "/api/ai/generate",
                &GenerateRequest {
                    system_prompt,
                    user_prompt,
                    max_tokens,
                },
                VoiceError::GenerationFailed,
            )
            .await?;
        response
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| VoiceError::GenerationFailed("empty generation".to_string()))
    }
}

/// Composes agent lines, preferring generated text over fixed phrases.
#[derive(Clone, Default)]
pub struct Scriptwriter {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl Scriptwriter {
    /// A scriptwriter that only uses the fixed phrases.
    pub fn fixed() -> Self {
        Self { generator: None }
    }

    pub fn with_generator(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator: Some(generator),
        }
    }

    /// Returns the line to speak for `kind`.
    pub async fn line(&self, kind: LineKind, ctx: &LineContext) -> String {
        let Some(generator) = &self.generator else {
            return fallback_line(kind, ctx);
        };
        if kind == LineKind::QuestionIntro {
            return fallback_line(kind, ctx);
        }

        let (system_prompt, user_prompt) = prompts(kind, ctx);
        match generator
            .generate(&system_prompt, &user_prompt, LINE_MAX_TOKENS)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(kind = ?kind, error = %e, "line generation failed, using fixed phrase");
                fallback_line(kind, ctx)
            }
        }
    }
}

impl std::fmt::Debug for Scriptwriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scriptwriter")
            .field("generated", &self.generator.is_some())
            .finish()
    }
}

fn prompts(kind: LineKind, ctx: &LineContext) -> (String, String) {
    let system_prompt = format!(
        "Eres {}, una entrevistadora amable que guía una evaluación por voz. \
         Responde con una sola frase breve en español, sin emojis ni formato.",
        ctx.persona_name
    );
    let name = ctx.user_name.as_deref().unwrap_or("la persona");
    let user_prompt = match kind {
        LineKind::Greeting => format!("Saluda a {} y explica que harás unas preguntas.", name),
        LineKind::NamePreference => format!(
            "Pregunta cuál de estos nombres prefiere que uses: {}.",
            ctx.name_candidates.join(", ")
        ),
        LineKind::NameRetry => format!(
            "No entendiste la respuesta. Vuelve a preguntar cuál de estos nombres prefiere: {}.",
            ctx.name_candidates.join(", ")
        ),
        LineKind::Transition => "Agradece la respuesta y anuncia la siguiente pregunta.".to_string(),
        LineKind::Confirmation => format!("Confirma que a partir de ahora la llamarás {}.", name),
        LineKind::FollowupPrompt => "Pregunta si quiere añadir algo más a su respuesta.".to_string(),
        LineKind::QuestionIntro => ctx.question.clone().unwrap_or_default(),
    };
    (system_prompt, user_prompt)
}

/// The fixed phrase for `kind`.
pub fn fallback_line(kind: LineKind, ctx: &LineContext) -> String {
    let options = || ctx.name_candidates.join(" o ");
    match kind {
        LineKind::Greeting => match &ctx.user_name {
            Some(name) => format!(
                "Hola, {}. Soy {} y te haré algunas preguntas.",
                name, ctx.persona_name
            ),
            None => format!("Hola. Soy {} y te haré algunas preguntas.", ctx.persona_name),
        },
        LineKind::NamePreference => format!(
            "Antes de empezar, ¿cómo prefieres que te llame: {}?",
            options()
        ),
        LineKind::NameRetry => format!(
            "Perdona, no te he entendido. ¿Prefieres que te llame {}?",
            options()
        ),
        LineKind::QuestionIntro => ctx.question.clone().unwrap_or_default(),
        LineKind::Transition => "Gracias. Pasemos a la siguiente pregunta.".to_string(),
        LineKind::Confirmation => match &ctx.user_name {
            Some(name) => format!("Perfecto, te llamaré {}.", name),
            None => "Perfecto.".to_string(),
        },
        LineKind::FollowupPrompt => "¿Hay algo más que quieras añadir?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _: &str, _: &str, _: u32) -> Result<String, VoiceError> {
            Err(VoiceError::GenerationFailed("503".to_string()))
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, _: &str, user: &str, _: u32) -> Result<String, VoiceError> {
            Ok(format!("generated: {}", user))
        }
    }

    fn ctx() -> LineContext {
        LineContext {
            persona_name: "Ada".to_string(),
            user_name: Some("Jose".to_string()),
            question: Some("¿Qué sabes de IA?".to_string()),
            name_candidates: vec!["Maria".to_string(), "Jose".to_string()],
        }
    }

    #[tokio::test]
    async fn generation_failure_falls_back_to_fixed_phrase() {
        let writer = Scriptwriter::with_generator(Arc::new(FailingGenerator));
        let line = writer.line(LineKind::Confirmation, &ctx()).await;
        assert_eq!(line, "Perfecto, te llamaré Jose.");
    }

    #[tokio::test]
    async fn question_text_is_never_generated() {
        let writer = Scriptwriter::with_generator(Arc::new(EchoGenerator));
        let line = writer.line(LineKind::QuestionIntro, &ctx()).await;
        assert_eq!(line, "¿Qué sabes de IA?");

        let greeting = writer.line(LineKind::Greeting, &ctx()).await;
        assert!(greeting.starts_with("generated: "));
    }

    #[test]
    fn name_preference_lists_candidates() {
        let line = fallback_line(LineKind::NamePreference, &ctx());
        assert!(line.contains("Maria o Jose"));
    }
}
