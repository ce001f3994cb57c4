//! Haven Server - conversational home-security assistant backend.
//!
//! This crate provides the HTTP service around a per-client session cache:
//! - Concurrent session store with atomic get-or-create
//! - Background sweeper that evicts sessions idle beyond the TTL
//! - Request dispatcher with typed errors and bounded provider calls
//! - Gemini provider with lazy, initialize-once client setup
//!
//! ## Architecture
//!
//! ```text
//! Client → Routes (identity → validate) → Dispatcher → Session ⇄ Provider
//!                                              ↑
//!                                        Session Store ← Sweeper (interval)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod dispatcher;
pub mod provider;
pub mod routes;
pub mod session;
pub mod sweeper;

pub use dispatcher::{ChatError, ChatService};
pub use provider::{
    ChatProvider, Conversation, GeminiProvider, LazyProvider, ProviderError, ProviderErrorKind,
    Role, Turn,
};
pub use routes::{build_router, AppState};
pub use session::{Session, SessionStore};

use haven_common::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;

/// Build the application state with the Gemini provider wired in lazily.
///
/// The provider client is constructed by the first request that needs it;
/// its success or failure is cached for the process lifetime.
pub fn build_state(config: &Config) -> AppState {
    let provider_config = config.provider.clone();
    let provider = Arc::new(LazyProvider::new(move || {
        GeminiProvider::from_config(&provider_config)
            .map(|provider| Arc::new(provider) as Arc<dyn ChatProvider>)
    }));

    build_state_with_provider(config, provider)
}

/// Build the application state around an explicit provider handle.
/// This is useful for testing with stubbed providers.
pub fn build_state_with_provider(config: &Config, provider: Arc<LazyProvider>) -> AppState {
    let store = Arc::new(SessionStore::new());
    let service = Arc::new(ChatService::new(
        store,
        provider,
        config.provider.request_timeout(),
    ));

    let trusted_proxy = config
        .server
        .trusted_proxy
        .as_deref()
        .and_then(|addr| match addr.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(addr = %addr, "Ignoring unparseable trusted proxy address");
                None
            }
        });

    AppState {
        service,
        trusted_proxy,
    }
}

/// Start the Haven server.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config);

    sweeper::spawn(
        state.service.store().clone(),
        config.sessions.sweep_interval(),
        config.sessions.idle_ttl(),
    );

    let addr = SocketAddr::from((
        config.server.bind.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let router = build_router(config, state);

    tracing::info!("Starting Haven server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
