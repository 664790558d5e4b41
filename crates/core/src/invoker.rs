//! Model fallback invocation.
//!
//! One logical request is tried against the selected model first and then
//! against every other catalog model exactly once. Retriable failures advance
//! to the next model; anything else aborts immediately.

use crate::{
    client::{GenerateRequest, GenerativeClient},
    error::{FailureClass, InvokeError, ProviderError},
    grading::{ResponseSchema, parse_response},
    models::ModelCatalog,
};
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-call configuration, passed in explicitly on every invocation.
#[derive(Debug, Clone)]
pub struct InvokerSettings {
    pub api_key: Option<SecretString>,
    pub selected_model: String,
    /// Upper bound for a single model attempt before it counts as retriable.
    pub attempt_timeout: Duration,
}

impl InvokerSettings {
    pub fn new(api_key: Option<SecretString>, selected_model: impl Into<String>) -> Self {
        Self {
            api_key,
            selected_model: selected_model.into(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().trim().is_empty())
    }

    /// The credential, or a configuration error before any network call.
    pub fn credential(&self) -> Result<&str, InvokeError> {
        match &self.api_key {
            Some(key) if !key.expose_secret().trim().is_empty() => Ok(key.expose_secret()),
            _ => Err(InvokeError::MissingCredential),
        }
    }
}

/// A successful invocation and the model that served it.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation<T> {
    pub value: T,
    pub model: String,
}

/// Wraps a [`GenerativeClient`] with the model fallback loop.
#[derive(Clone)]
pub struct FallbackInvoker {
    client: Arc<dyn GenerativeClient>,
    catalog: ModelCatalog,
}

impl FallbackInvoker {
    pub fn new(client: Arc<dyn GenerativeClient>, catalog: ModelCatalog) -> Self {
        Self { client, catalog }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn client(&self) -> &Arc<dyn GenerativeClient> {
        &self.client
    }

    /// Runs `request` through the fallback order and returns the raw text.
    #[instrument(skip_all, fields(capability = %request.capability, selected = %settings.selected_model))]
    pub async fn invoke(
        &self,
        settings: &InvokerSettings,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<Invocation<String>, InvokeError> {
        let api_key = settings.credential()?;
        let order = self.catalog.fallback_order(&settings.selected_model);
        let attempts = order.len();
        let mut last_failure: Option<(String, ProviderError)> = None;

        for (attempt, model) in order.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(InvokeError::Cancelled);
            }
            info!(model = %model.id, attempt, "Trying model");

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(InvokeError::Cancelled),
                outcome = tokio::time::timeout(
                    settings.attempt_timeout,
                    self.client.generate(api_key, &model.id, request),
                ) => outcome,
            };

            let error = match outcome {
                Ok(Ok(text)) => {
                    info!(model = %model.id, attempt, "Model succeeded");
                    return Ok(Invocation {
                        value: text,
                        model: model.id.clone(),
                    });
                }
                Ok(Err(error)) => error,
                Err(_) => ProviderError::timed_out(settings.attempt_timeout),
            };

            match error.classify() {
                FailureClass::Retriable(reason) => {
                    warn!(model = %model.id, attempt, ?reason, error = %error, "Model failed, falling back to next model");
                    last_failure = Some((model.id.clone(), error));
                }
                FailureClass::Fatal => {
                    warn!(model = %model.id, attempt, error = %error, "Model rejected the request");
                    return Err(InvokeError::Rejected {
                        model: model.id.clone(),
                        source: error,
                    });
                }
            }
        }

        // The catalog is never empty, so at least one failure was recorded.
        let (model, source) = last_failure
            .unwrap_or_else(|| (String::new(), ProviderError::new("no models configured")));
        Err(InvokeError::Exhausted {
            attempts,
            model,
            source,
        })
    }

    /// Runs `request` and parses the answer as the JSON payload `T`.
    ///
    /// A response that does not match `T` is fatal: another model would be
    /// asked the same question, so the call is not repeated.
    pub async fn invoke_json<T: ResponseSchema>(
        &self,
        settings: &InvokerSettings,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<Invocation<T>, InvokeError> {
        let Invocation { value, model } = self.invoke(settings, request, cancel).await?;
        match parse_response::<T>(&value) {
            Ok(parsed) => Ok(Invocation {
                value: parsed,
                model,
            }),
            Err(reason) => {
                warn!(%model, %reason, "Model returned a malformed response");
                Err(InvokeError::MalformedResponse { model, reason })
            }
        }
    }
}
