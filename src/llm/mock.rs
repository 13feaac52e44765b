use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::context::ChatContext;
use crate::error::ProviderError;
use crate::llm::{CompletionRequest, Provider, SamplingParams};

/// Provider double that replays queued responses and records every request.
pub(crate) struct ScriptedProvider {
    name: String,
    model: String,
    defaults: SamplingParams,
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    context: Arc<ChatContext>,
}

impl ScriptedProvider {
    pub(crate) fn new(name: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            defaults: SamplingParams::default(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            context: Arc::new(ChatContext::new()),
        }
    }

    pub(crate) fn replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut queue = self.responses.lock().expect("lock poisoned");
            queue.extend(replies.into_iter().map(|reply| Ok(reply.into())));
        }
        self
    }

    pub(crate) fn then_fail(self, message: &str) -> Self {
        self.responses
            .lock()
            .expect("lock poisoned")
            .push_back(Err(ProviderError::Request(message.to_string())));
        self
    }

    pub(crate) fn with_defaults(mut self, defaults: SamplingParams) -> Self {
        self.defaults = defaults;
        self
    }

    pub(crate) fn with_context(mut self, context: Arc<ChatContext>) -> Self {
        self.context = context;
        self
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn defaults(&self) -> &SamplingParams {
        &self.defaults
    }

    fn context(&self) -> &ChatContext {
        &self.context
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        self.requests.lock().expect("lock poisoned").push(request);
        self.responses
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::Response(
                    "no more scripted responses".to_string(),
                ))
            })
    }
}
