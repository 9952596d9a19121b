//! Grounded answer composition.
//!
//! Retrieved chunks are rendered into a CONTEXT block, each prefixed with
//! its chunk id so the generator can cite it, and sent to an
//! [`AnswerGenerator`] together with a fixed grounding instruction.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::QueryMatch;

/// System instruction sent with every generation request.
pub const GROUNDING_INSTRUCTION: &str = "You are a personal knowledge assistant. \
Answer ONLY using the CONTEXT. If the CONTEXT is not sufficient, say that you \
do not have enough information. Cite the ids of the passages you use in square \
brackets, for example [notes_0003].";

/// Returned without a generator call when nothing was retrieved.
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I don't have enough information in your documents to answer that.";

/// Chat-style text generation backend.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce a completion for a system instruction and a user message.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Render matches as `[id] title\ntext` blocks separated by blank lines.
/// Repeated ids keep their first occurrence.
pub fn compose_context(matches: &[QueryMatch]) -> String {
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();
    for m in matches {
        if !seen.insert(m.id.as_str()) {
            continue;
        }
        let block = match &m.metadata {
            Some(meta) if meta.text.is_empty() => format!("[{}] {}", m.id, meta.title),
            Some(meta) => format!("[{}] {}\n{}", m.id, meta.title, meta.text),
            None => format!("[{}]", m.id),
        };
        blocks.push(block.trim_end().to_string());
    }
    blocks.join("\n\n")
}

fn user_message(query: &str, context: &str) -> String {
    format!("CONTEXT:\n{}\n\nQUESTION:\n{}", context, query)
}

pub struct AnswerComposer {
    generator: Arc<dyn AnswerGenerator>,
}

impl AnswerComposer {
    pub fn new(generator: Arc<dyn AnswerGenerator>) -> Self {
        Self { generator }
    }

    /// Ask the generator to answer `query` from an already-composed context.
    pub async fn build_answer(&self, query: &str, context: &str) -> Result<String> {
        if context.trim().is_empty() {
            tracing::debug!("empty context; skipping generation");
            return Ok(INSUFFICIENT_CONTEXT_ANSWER.to_string());
        }
        let answer = self
            .generator
            .complete(GROUNDING_INSTRUCTION, &user_message(query, context))
            .await?;
        tracing::debug!(
            model = self.generator.model_name(),
            context_chars = context.chars().count(),
            answer_chars = answer.chars().count(),
            "generated answer"
        );
        Ok(answer)
    }

    pub async fn answer(&self, query: &str, matches: &[QueryMatch]) -> Result<String> {
        let context = compose_context(matches);
        self.build_answer(query, &context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderErrorKind, VaultError};
    use crate::models::ChunkMetadata;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        prompts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AnswerGenerator for Recorder {
        fn model_name(&self) -> &str {
            "recorder"
        }
        async fn complete(&self, system: &str, user: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            Ok("Paris [geo_0000]".to_string())
        }
    }

    struct Down;

    #[async_trait]
    impl AnswerGenerator for Down {
        fn model_name(&self) -> &str {
            "down"
        }
        async fn complete(&self, _: &str, _: &str) -> Result<String> {
            Err(VaultError::provider("down", ProviderErrorKind::Transient, "502"))
        }
    }

    fn hit(id: &str, title: &str, text: &str) -> QueryMatch {
        QueryMatch {
            id: id.into(),
            score: 0.9,
            metadata: Some(ChunkMetadata {
                user_id: "u1".into(),
                item_id: "geo".into(),
                title: title.into(),
                ordinal: 0,
                text: text.into(),
                created_at: 1,
                content_hash: String::new(),
                source_confidence: None,
            }),
        }
    }

    #[test]
    fn test_compose_context_dedupes_and_formats() {
        let ctx = compose_context(&[
            hit("geo_0000", "Capitals", "Paris is the capital of France."),
            hit("geo_0001", "Capitals", "Rome is the capital of Italy."),
            hit("geo_0000", "Capitals", "Paris is the capital of France."),
        ]);
        assert_eq!(
            ctx,
            "[geo_0000] Capitals\nParis is the capital of France.\n\n\
             [geo_0001] Capitals\nRome is the capital of Italy."
        );
    }

    #[test]
    fn test_compose_context_without_metadata() {
        let m = QueryMatch {
            id: "x_0000".into(),
            score: 0.1,
            metadata: None,
        };
        assert_eq!(compose_context(&[m]), "[x_0000]");
        assert_eq!(compose_context(&[]), "");
    }

    #[tokio::test]
    async fn test_answer_sends_grounded_prompt() {
        let rec = Arc::new(Recorder::default());
        let composer = AnswerComposer::new(rec.clone());
        let answer = composer
            .answer(
                "What is the capital of France?",
                &[hit("geo_0000", "Capitals", "Paris is the capital of France.")],
            )
            .await
            .unwrap();
        assert_eq!(answer, "Paris [geo_0000]");

        let prompts = rec.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].0, GROUNDING_INSTRUCTION);
        assert!(prompts[0].1.starts_with("CONTEXT:\n[geo_0000] Capitals"));
        assert!(prompts[0].1.ends_with("QUESTION:\nWhat is the capital of France?"));
    }

    #[tokio::test]
    async fn test_empty_context_skips_generator() {
        let rec = Arc::new(Recorder::default());
        let composer = AnswerComposer::new(rec.clone());
        let answer = composer.answer("anything?", &[]).await.unwrap();
        assert_eq!(answer, INSUFFICIENT_CONTEXT_ANSWER);
        assert!(rec.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generator_errors_propagate() {
        let composer = AnswerComposer::new(Arc::new(Down));
        let err = composer
            .build_answer("q", "[a_0000] t\nbody")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "provider_error");
    }
}
