//! AutoReply server.
//!
//! Wires the transport adapter, the responder pipeline and the HTTP
//! status surface together, and owns graceful shutdown: signals cancel
//! the token, the in-flight message finishes, background tasks join.

use crate::config::{AppConfig, default_data_dir};
use crate::flood::{FloodGuard, FloodGuardConfig};
use crate::matcher::ReplyMatcher;
use crate::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::responder::{Responder, ResponderConfig};
use crate::rng::RngHandle;
use crate::routes;
use crate::store::{ReplyStore, SettingsStore};
use anyhow::Result;
use ar_channels::{ChannelAdapter, LoopbackAdapter};
use axum::Extension;
use axum::http::Request;
use axum::response::Response;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::clock::{Clock, SystemClock};

pub struct AppState {
    pub started_at: Instant,
    pub responder: Arc<Responder>,
}

/// Build the responder stack from config and stores. Shared by serve
/// and by the offline CLI commands.
pub async fn build_responder(
    cfg: &AppConfig,
    adapter: Arc<dyn ChannelAdapter>,
    data_dir: PathBuf,
) -> Arc<Responder> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rng = RngHandle::from_entropy();

    let store = Arc::new(ReplyStore::new(&data_dir));
    let index = store.load_replies().await;
    let reactions = store.load_reactions().await;
    let settings = Arc::new(SettingsStore::load(&data_dir).await);

    let matcher = Arc::new(ReplyMatcher::new(
        index,
        Duration::from_secs(cfg.matcher.cache_ttl_secs),
        clock.clone(),
        rng.clone(),
    ));
    let limiter = Arc::new(RateLimiter::new(
        RateLimiterConfig {
            max_per_minute: cfg.limits.max_actions_per_minute,
            backoff_multiplier: cfg.limits.backoff_multiplier,
            max_block: Duration::from_secs(cfg.limits.max_block_secs),
        },
        clock.clone(),
    ));
    let flood = Arc::new(FloodGuard::new(
        FloodGuardConfig {
            window: Duration::from_secs(cfg.flood.window_secs),
            max_per_window: cfg.flood.max_per_window,
            mute: Duration::from_secs(cfg.flood.mute_secs),
            sweep_interval: Duration::from_secs(cfg.flood.sweep_interval_secs),
        },
        clock.clone(),
    ));

    Arc::new(Responder::new(
        adapter,
        matcher,
        limiter,
        flood,
        settings,
        store,
        reactions,
        ResponderConfig::from_app(cfg),
        rng,
        clock,
    ))
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load_or_default(config_path).await;
    let started_at = Instant::now();
    let data_dir = default_data_dir();
    tracing::info!(
        bot_name = %cfg.general.bot_name,
        owner_configured = !cfg.general.owner_id.is_empty(),
        max_actions_per_minute = cfg.limits.max_actions_per_minute,
        flood_ceiling = cfg.flood.max_per_window,
        server_enabled = cfg.server.enabled,
        server_port = cfg.server.port,
        data_dir = %data_dir.display(),
        "configuration loaded"
    );

    let adapter = Arc::new(LoopbackAdapter::new());
    adapter.connect().await?;
    let responder = build_responder(&cfg, adapter.clone(), data_dir).await;

    let shutdown = CancellationToken::new();

    // Bridge: the adapter pushes inbound messages into an mpsc channel;
    // the forwarder feeds them to the responder queue.
    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    adapter.start(inbound_tx).await?;
    let forwarder = {
        let responder = responder.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = inbound_rx.recv() => match message {
                        Some(message) => responder.enqueue(message),
                        None => break,
                    },
                }
            }
        })
    };

    let worker = tokio::spawn(responder.clone().run_loop(shutdown.clone()));
    let sweeper = tokio::spawn(
        responder
            .flood_handle()
            .run_sweeper(shutdown.clone()),
    );

    if cfg.server.enabled {
        let addr = SocketAddr::from(([127, 0, 0, 1], cfg.server.port));
        let listener = preflight_bind_listener(addr).await?;

        let state = Arc::new(AppState {
            started_at,
            responder: responder.clone(),
        });
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            })
            .on_response(
                |response: &Response, latency: Duration, _span: &tracing::Span| {
                    tracing::info!(
                        status = response.status().as_u16(),
                        latency_ms = latency.as_millis() as u64,
                        "http request completed"
                    );
                },
            );
        let app = routes::router()
            .layer(Extension(state))
            .layer(trace_layer);

        tracing::info!(%addr, "autoreply serving");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
            .await?;
        tracing::info!("http server shutdown completed");
    } else {
        tracing::info!("autoreply running without http server");
        shutdown_signal(shutdown.clone()).await;
    }

    shutdown.cancel();
    for (name, handle) in [("forwarder", forwarder), ("responder", worker), ("sweeper", sweeper)] {
        match handle.await {
            Ok(()) => tracing::info!(task = name, "task shutdown completed"),
            Err(e) => tracing::error!(task = name, error = %e, "task join failed during shutdown"),
        }
    }

    Ok(())
}

/// Log the effective configuration and store contents without starting.
pub async fn status(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load_or_default(config_path).await;
    let data_dir = default_data_dir();
    let store = ReplyStore::new(&data_dir);
    let index = store.load_replies().await;
    let reactions = store.load_reactions().await;
    tracing::info!(
        bot_name = %cfg.general.bot_name,
        owner_configured = !cfg.general.owner_id.is_empty(),
        reply_patterns = index.len(),
        reaction_pool = reactions.len(),
        max_actions_per_minute = cfg.limits.max_actions_per_minute,
        server_port = cfg.server.port,
        data_dir = %data_dir.display(),
        "status ok"
    );
    Ok(())
}

/// Offline matcher dry run for the `test` subcommand.
pub async fn test_reply(config_path: Option<PathBuf>, text: &str) -> Result<()> {
    let cfg = AppConfig::load_or_default(config_path).await;
    let adapter = Arc::new(LoopbackAdapter::new());
    let responder = build_responder(&cfg, adapter, default_data_dir()).await;
    match responder.test_response(text) {
        Some(reply) => println!("{reply}"),
        None => println!("(no reply)"),
    }
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "bind check passed");
    Ok(listener)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}
