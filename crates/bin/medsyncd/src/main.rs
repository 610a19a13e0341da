//! # medsyncd — facility sync daemon
//!
//! Composition root that wires the sync engine to its adapters and serves
//! the local read API.
//!
//! ## Responsibilities
//! - Load configuration (`medsync.toml` + environment overrides)
//! - Install the `tracing` subscriber
//! - Pick the adapters: simulated hospitals, or WebSocket push + REST API
//! - Start the session (push channel, eviction sweeper) and prime the cache
//! - Build the axum router, bind to a TCP port and serve
//! - Shut down gracefully on Ctrl-C or when the push channel rejects the
//!   session credentials
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no sync logic belongs here.

mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use medsync_adapter_http_axum::router;
use medsync_adapter_http_axum::state::AppState;
use medsync_adapter_push_ws::WsPushTransport;
use medsync_adapter_rest::RestFacilitySource;
use medsync_adapter_virtual::VirtualIntegration;
use medsync_app::ports::{DirectoryQuery, FacilitySource, PushTransport};
use medsync_app::session::SyncSession;
use medsync_app::supervisor::FatalEvent;
use medsync_domain::connection::AuthToken;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let filter = EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|err| {
        eprintln!("invalid log filter {:?}: {err}", config.logging.filter);
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let token = config
        .token()
        .map(AuthToken::new)
        .context("no auth token configured")?;

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;

    if config.integrations.r#virtual.enabled {
        let integration = VirtualIntegration::new(config.integrations.r#virtual.clone());
        tracing::info!(
            integration = integration.name(),
            hospitals = integration.hospital_ids().len(),
            "using simulated hospitals"
        );
        run(
            listener,
            integration.transport(),
            integration.source(),
            &config,
            token,
        )
        .await
    } else {
        let transport = WsPushTransport::new(config.push.clone());
        let source = RestFacilitySource::new(config.rest.clone(), Some(token.clone()))
            .context("failed to build REST client")?;
        tracing::info!(push = %config.push.url, api = %config.rest.base_url, "using live hospitals API");
        run(listener, transport, source, &config, token).await
    }
}

async fn run<T, S>(
    listener: TcpListener,
    transport: T,
    source: S,
    config: &Config,
    token: AuthToken,
) -> anyhow::Result<()>
where
    T: PushTransport,
    S: FacilitySource,
{
    let session = Arc::new(SyncSession::new(transport, source, config.session_config()));
    let fatal = session.fatal_events();
    session.start(token);

    if config.freshness.prime_directory {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            match session
                .freshness()
                .refresh_directory(&DirectoryQuery::default())
                .await
            {
                Ok(snapshot) => {
                    tracing::info!(facilities = snapshot.facilities.len(), "directory primed");
                }
                Err(err) => tracing::warn!(error = %err, "failed to prime directory"),
            }
        });
    }

    let app = router::build(AppState::from_arc(Arc::clone(&session)));
    tracing::info!(addr = %listener.local_addr()?, "medsyncd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(fatal))
        .await
        .context("HTTP server failed")?;

    session.logout();
    tracing::info!("medsyncd stopped");
    Ok(())
}

async fn shutdown_signal(mut fatal: broadcast::Receiver<FatalEvent>) {
    let rejected = async {
        loop {
            match fatal.recv().await {
                Ok(FatalEvent::AuthRejected) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "failed to listen for Ctrl-C");
            }
            tracing::info!("shutdown requested");
        }
        () = rejected => {
            tracing::error!("push channel rejected the session credentials, shutting down");
        }
    }
}
