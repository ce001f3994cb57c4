//! Text-generation provider abstraction.
//!
//! Provides a unified interface for the conversational backend plus the
//! process-wide lazily-initialized provider handle shared by all requests.

mod gemini;

pub use gemini::GeminiProvider;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::Arc;

// ============================================================================
// Conversation Transcript
// ============================================================================

/// Role of one turn in a conversation transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

/// One turn in a conversation transcript.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Client-side transcript of an ongoing multi-turn conversation.
///
/// The provider is stateless between calls; the transcript is replayed on
/// every exchange so the model sees the full history.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// All turns so far, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Append a completed user/model exchange.
    pub fn record_exchange(&mut self, message: &str, reply: &str) {
        self.turns.push(Turn {
            role: Role::User,
            text: message.to_string(),
        });
        self.turns.push(Turn {
            role: Role::Model,
            text: reply.to_string(),
        });
    }

    /// Number of turns recorded.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no exchange has completed yet.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Why a provider call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The provider client could not be initialized or reached at all
    Unavailable,
    /// A single exchange failed (transport error, upstream status, bad payload)
    Exchange,
    /// The provider answered but produced no usable content
    EmptyReply,
}

/// Error from a provider.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
}

impl ProviderError {
    /// The provider cannot be used at all.
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: ProviderErrorKind::Unavailable,
            message: message.into(),
            status_code: None,
        }
    }

    /// One exchange failed; later exchanges may succeed.
    pub fn exchange(
        provider: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind: ProviderErrorKind::Exchange,
            message: message.into(),
            status_code,
        }
    }

    /// The provider returned a structurally empty result.
    pub fn empty_reply(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: ProviderErrorKind::EmptyReply,
            message: "no content generated".into(),
            status_code: None,
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.provider, self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Unified interface for conversational text-generation providers.
#[async_trait]
pub trait ChatProvider: Send + Sync + std::fmt::Debug {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Send one user turn against the given transcript and return the reply.
    ///
    /// The transcript is read-only here; the caller decides whether the
    /// exchange is committed.
    async fn send_turn(
        &self,
        conversation: &Conversation,
        message: &str,
    ) -> Result<String, ProviderError>;
}

// ============================================================================
// Lazy Shared Provider
// ============================================================================

type InitResult = Result<Arc<dyn ChatProvider>, ProviderError>;

/// Process-wide provider handle with initialize-once semantics.
///
/// The first caller runs the init closure; every later caller observes the
/// same cached outcome. A failed initialization is cached too and keeps
/// surfacing until the process restarts.
pub struct LazyProvider {
    cell: OnceCell<InitResult>,
    init: Box<dyn Fn() -> InitResult + Send + Sync>,
}

impl LazyProvider {
    /// Create a handle whose provider is built on first use.
    pub fn new(init: impl Fn() -> InitResult + Send + Sync + 'static) -> Self {
        Self {
            cell: OnceCell::new(),
            init: Box::new(init),
        }
    }

    /// Create a handle around an already-built provider.
    pub fn ready(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            cell: OnceCell::with_value(Ok(provider)),
            init: Box::new(|| {
                Err(ProviderError::unavailable("none", "provider handle not initialized"))
            }),
        }
    }

    /// Get the shared provider, initializing it on first call.
    pub fn get(&self) -> InitResult {
        self.cell.get_or_init(|| (self.init)()).clone()
    }
}
