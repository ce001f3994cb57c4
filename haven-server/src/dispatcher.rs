//! Request dispatcher.
//!
//! The per-request entry point: validates the message, resolves the shared
//! provider, obtains the caller's session, and runs one bounded exchange.
//! The session is only mutated (transcript + activity timestamp) when the
//! exchange succeeds; every failure path leaves it exactly as found so a
//! transient provider error never destroys conversation continuity.

use crate::provider::{LazyProvider, ProviderError, ProviderErrorKind};
use crate::session::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Typed failure of one chat request.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request itself is unusable (empty message, bad payload)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The provider client failed to initialize or cannot be reached
    #[error("Assistant unavailable: {0}")]
    ProviderUnavailable(String),

    /// A single exchange failed; the session survives for retry
    #[error("Message exchange failed: {0}")]
    ExchangeFailed(String),

    /// The provider answered with no usable content
    #[error("No response generated")]
    EmptyReply,
}

impl ChatError {
    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::ProviderUnavailable(_) | Self::ExchangeFailed(_) | Self::EmptyReply => 500,
        }
    }
}

impl From<ProviderError> for ChatError {
    fn from(err: ProviderError) -> Self {
        match err.kind {
            ProviderErrorKind::Unavailable => Self::ProviderUnavailable(err.to_string()),
            ProviderErrorKind::Exchange => Self::ExchangeFailed(err.to_string()),
            ProviderErrorKind::EmptyReply => Self::EmptyReply,
        }
    }
}

/// Dispatches chat messages into per-client sessions.
pub struct ChatService {
    store: Arc<SessionStore>,
    provider: Arc<LazyProvider>,
    request_timeout: Duration,
}

impl ChatService {
    /// Create a dispatcher over the given store and provider handle.
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<LazyProvider>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            request_timeout,
        }
    }

    /// The session store backing this dispatcher.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Run one message exchange for `identifier`.
    ///
    /// Returns the reply text, or a typed error. The exchange holds only the
    /// one session's conversation lock across the provider round trip, never
    /// a store-wide lock.
    pub async fn handle_message(
        &self,
        identifier: &str,
        message: &str,
    ) -> Result<String, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::InvalidRequest("message must not be empty".into()));
        }

        let provider = self.provider.get()?;

        let session = self.store.get_or_create(identifier);
        let mut conversation = session.conversation().lock().await;

        let outcome = tokio::time::timeout(
            self.request_timeout,
            provider.send_turn(&conversation, message),
        )
        .await;

        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                tracing::warn!(
                    identifier = %identifier,
                    provider = %err.provider,
                    error = %err,
                    "Message exchange failed"
                );
                return Err(err.into());
            }
            Err(_) => {
                tracing::warn!(
                    identifier = %identifier,
                    timeout_secs = self.request_timeout.as_secs(),
                    "Message exchange timed out"
                );
                return Err(ChatError::ExchangeFailed(format!(
                    "no reply from provider within {}s",
                    self.request_timeout.as_secs()
                )));
            }
        };

        conversation.record_exchange(message, &reply);
        drop(conversation);
        session.touch();

        tracing::debug!(identifier = %identifier, "Message exchange completed");
        Ok(reply)
    }
}
