//! Retrieval-augmented chat: recalls similar past text from a [`VectorStore`]
//! and hands it to the provider alongside the new message.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Message, Role};
use crate::error::{ProviderError, RetrievalError};
use crate::llm::{GenerateOptions, Provider};
use crate::vector::{Metadata, VectorStore};

const DEFAULT_TOP_K: usize = 3;

/// Turns text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

pub struct RetrievalChat {
    provider: Arc<dyn Provider>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl RetrievalChat {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            provider,
            store,
            embedder,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Embeds `text` and stores it with `metadata`; the `text` key is always
    /// set to the stored text.
    pub async fn remember(&self, text: &str, mut metadata: Metadata) -> Result<String, RetrievalError> {
        let vector = self.embedder.embed(text).await?;
        metadata.insert("text".to_string(), Value::String(text.to_string()));

        let mut ids = self.store.add(vec![vector], Some(vec![metadata])).await?;
        Ok(ids.pop().unwrap_or_default())
    }

    /// One chat turn with recalled context prepended to `message` for this
    /// request only. The provider's history records the plain message, and
    /// both the message and the reply are remembered afterwards.
    pub async fn chat(
        &self,
        message: &str,
        options: &GenerateOptions,
    ) -> Result<String, RetrievalError> {
        let query = self.embedder.embed(message).await?;
        let recalled = self.store.query(&query, self.top_k).await?;
        tracing::debug!(recalled = recalled.len(), "retrieved context for chat turn");

        let context = self.provider.context();
        let mut messages = context.history();
        context.add_message(Role::User, message);
        messages.push(Message::user(augment(message, &recalled)));

        let request = self
            .provider
            .build_request(messages, context.system_prompt(), options);
        let reply = self.provider.complete(request).await?;
        context.add_message(Role::Assistant, reply.clone());

        let reply_vector = self.embedder.embed(&reply).await?;
        self.store
            .add(
                vec![query, reply_vector],
                Some(vec![
                    turn_metadata("user", message),
                    turn_metadata("assistant", &reply),
                ]),
            )
            .await?;
        Ok(reply)
    }
}

fn turn_metadata(role: &str, text: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("role".to_string(), Value::String(role.to_string()));
    metadata.insert("text".to_string(), Value::String(text.to_string()));
    metadata
}

fn augment(message: &str, recalled: &[Metadata]) -> String {
    let lines: Vec<String> = recalled
        .iter()
        .filter_map(|metadata| metadata.get("text").and_then(Value::as_str))
        .map(|text| format!("- {text}"))
        .collect();

    if lines.is_empty() {
        return message.to_string();
    }
    format!("Relevant context:\n{}\n\n{message}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm::mock::ScriptedProvider;
    use crate::vector::InMemoryVectorStore;

    /// Letter-frequency embedding over a handful of letters.
    struct LetterEmbedder;

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            let text = text.to_ascii_lowercase();
            Ok(['a', 'e', 'o', 'r', 's', 't']
                .iter()
                .map(|letter| text.chars().filter(|c| c == letter).count() as f32)
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Err(ProviderError::Request("embedding service down".to_string()))
        }
    }

    #[tokio::test]
    async fn chat_prepends_recalled_text_and_remembers_the_turn() {
        let provider = Arc::new(ScriptedProvider::new("scripted", "m").replies(["noted"]));
        let store = Arc::new(InMemoryVectorStore::new());
        let chat = RetrievalChat::new(provider.clone(), store.clone(), Arc::new(LetterEmbedder))
            .top_k(1);

        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), json!("notes"));
        chat.remember("rust traits are great", metadata)
            .await
            .expect("remembers");

        let reply = chat
            .chat("tell me about traits", &GenerateOptions::default())
            .await
            .expect("chats");
        assert_eq!(reply, "noted");

        let sent = &provider.requests()[0].messages[0].content;
        assert_eq!(
            sent,
            "Relevant context:\n- rust traits are great\n\ntell me about traits"
        );
        assert_eq!(store.count().await, 3);
    }

    #[tokio::test]
    async fn recalled_context_is_not_recorded_in_history() {
        let provider = Arc::new(ScriptedProvider::new("scripted", "m").replies(["one", "two"]));
        let chat = RetrievalChat::new(
            provider.clone(),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(LetterEmbedder),
        );
        chat.remember("rust traits are great", Metadata::new())
            .await
            .expect("remembers");

        chat.chat("traits?", &GenerateOptions::default())
            .await
            .expect("first turn");
        chat.chat("more traits?", &GenerateOptions::default())
            .await
            .expect("second turn");

        let history = provider.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "traits?");
        assert_eq!(history[2].content, "more traits?");

        let second = &provider.requests()[1].messages;
        assert_eq!(second.len(), 3);
        assert_eq!(second[0].content, "traits?");
        assert!(second[2].content.starts_with("Relevant context:\n"));
        assert!(second[2].content.ends_with("\n\nmore traits?"));
    }

    #[tokio::test]
    async fn empty_store_sends_the_message_unchanged() {
        let provider = Arc::new(ScriptedProvider::new("scripted", "m").replies(["hi"]));
        let chat = RetrievalChat::new(
            provider.clone(),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(LetterEmbedder),
        );

        chat.chat("hello", &GenerateOptions::default())
            .await
            .expect("chats");
        assert_eq!(provider.requests()[0].messages[0].content, "hello");
        assert_eq!(provider.history().len(), 2);
    }

    #[tokio::test]
    async fn embedding_failure_skips_the_provider() {
        let provider = Arc::new(ScriptedProvider::new("scripted", "m").replies(["unused"]));
        let chat = RetrievalChat::new(
            provider.clone(),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(FailingEmbedder),
        );

        let err = chat
            .chat("hello", &GenerateOptions::default())
            .await
            .expect_err("embedder fails");
        assert!(matches!(err, RetrievalError::Provider(_)));
        assert!(provider.requests().is_empty());
    }

    #[test]
    fn augment_skips_records_without_text() {
        let recalled = vec![turn_metadata("user", "first"), Metadata::new()];
        assert_eq!(
            augment("question", &recalled),
            "Relevant context:\n- first\n\nquestion"
        );
    }
}
