//! Routes `<backend>/<model>` identifiers to configured providers.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::RouterConfig;
use crate::context::ChatContext;
use crate::error::{ConfigError, ResolutionError, RouterError};
use crate::llm::catalog::{self, ModelCatalog};
use crate::llm::{BackendKind, GenerateOptions, Provider, build_provider};

struct Route {
    provider: Arc<dyn Provider>,
    models: Vec<String>,
}

/// Owns one provider per configured backend and the list of models each
/// backend may serve.
///
/// Every call carries its resolved model in [`GenerateOptions::model`], so
/// concurrent calls for different models of one backend never interfere.
pub struct Router {
    routes: BTreeMap<String, Route>,
}

impl Router {
    /// Builds every configured backend with its own fresh chat context.
    pub fn new(config: RouterConfig) -> Result<Self, ConfigError> {
        Self::build(config, || Arc::new(ChatContext::new()))
    }

    /// Builds every configured backend bound to one shared `context`, so a
    /// conversation can continue across backends.
    pub fn with_context(config: RouterConfig, context: Arc<ChatContext>) -> Result<Self, ConfigError> {
        Self::build(config, || context.clone())
    }

    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    fn build<F>(config: RouterConfig, context: F) -> Result<Self, ConfigError>
    where
        F: Fn() -> Arc<ChatContext>,
    {
        let mut routes = BTreeMap::new();
        for (name, backend) in config.backends {
            let kind = BackendKind::from_name(&name)
                .ok_or_else(|| ConfigError::UnsupportedBackend(name.clone()))?;
            let provider = build_provider(kind, backend.provider_config(&name)?, context())?;
            tracing::debug!(backend = %name, models = backend.models.len(), "configured backend");
            routes.insert(
                name,
                Route {
                    provider,
                    models: backend.models,
                },
            );
        }
        Ok(Self { routes })
    }

    /// Splits `id` at the first `/` and checks the model against the backend's
    /// configured list.
    pub fn resolve(&self, id: &str) -> Result<(Arc<dyn Provider>, String), ResolutionError> {
        let (backend, model) = id
            .split_once('/')
            .filter(|(backend, model)| !backend.is_empty() && !model.is_empty())
            .ok_or_else(|| ResolutionError::MalformedIdentifier(id.to_string()))?;

        let route = self
            .routes
            .get(backend)
            .ok_or_else(|| ResolutionError::UnknownBackend(backend.to_string()))?;

        if !route.models.iter().any(|known| known == model) {
            return Err(ResolutionError::UnknownModel {
                backend: backend.to_string(),
                model: model.to_string(),
            });
        }
        Ok((route.provider.clone(), model.to_string()))
    }

    pub async fn generate(
        &self,
        id: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, RouterError> {
        let (provider, options) = self.route(id, options)?;
        Ok(provider.generate(prompt, &options).await?)
    }

    pub async fn generate_batch(
        &self,
        id: &str,
        prompts: &[String],
        options: &GenerateOptions,
    ) -> Result<Vec<String>, RouterError> {
        let (provider, options) = self.route(id, options)?;
        Ok(provider.generate_batch(prompts, &options).await?)
    }

    pub async fn chat(
        &self,
        id: &str,
        message: &str,
        options: &GenerateOptions,
    ) -> Result<String, RouterError> {
        let (provider, options) = self.route(id, options)?;
        Ok(provider.chat(message, &options).await?)
    }

    fn route(
        &self,
        id: &str,
        options: &GenerateOptions,
    ) -> Result<(Arc<dyn Provider>, GenerateOptions), ResolutionError> {
        let (provider, model) = self.resolve(id)?;
        tracing::debug!(backend = provider.name(), %model, "routing request");
        let mut options = options.clone();
        options.model = Some(model);
        Ok((provider, options))
    }

    pub fn provider(&self, backend: &str) -> Option<Arc<dyn Provider>> {
        self.routes.get(backend).map(|route| route.provider.clone())
    }

    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Every routable `<backend>/<model>` identifier.
    pub fn configured_models(&self) -> Vec<String> {
        self.routes
            .iter()
            .flat_map(|(backend, route)| {
                route
                    .models
                    .iter()
                    .map(move |model| format!("{backend}/{model}"))
            })
            .collect()
    }

    /// Static catalog of well-known model ids; independent of configuration.
    pub fn list_models() -> Vec<&'static str> {
        catalog::list_models()
    }

    pub fn model_info() -> ModelCatalog {
        catalog::model_info()
    }
}

/// Assembles a [`Router`] from already constructed providers.
#[derive(Default)]
pub struct RouterBuilder {
    routes: BTreeMap<String, Route>,
}

impl RouterBuilder {
    pub fn register<I, S>(mut self, backend: impl Into<String>, provider: Arc<dyn Provider>, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.insert(
            backend.into(),
            Route {
                provider,
                models: models.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn build(self) -> Router {
        Router {
            routes: self.routes,
        }
    }
}
