use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use assist_router::api::api_routes;
use assist_router::capabilities::{
    CapabilityRegistry, ConversationResponder, Dispatcher, WeatherCapability,
};
use assist_router::classifier::IntentClassifier;
use assist_router::cli::CliSession;
use assist_router::config::{AppConfig, StoreBackend};
use assist_router::llm::create_provider;
use assist_router::memory::ConversationMemory;
use assist_router::router::{RequestRouter, RouterConfig, RouterDeps};
use assist_router::store::{ConversationStore, FileStore, LibSqlStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Configuration errors are fatal
    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export OPENAI_API_KEY=sk-...   (or ASSIST_LLM_BACKEND=anthropic + ANTHROPIC_API_KEY)");
        std::process::exit(1);
    });

    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("🤖 Assist Router v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({})", config.llm.model, config.llm.backend);

    let llm = create_provider(&config.llm)?;

    // ── Conversation store ──────────────────────────────────────────────
    let store: Arc<dyn ConversationStore> = match config.store {
        StoreBackend::File => {
            eprintln!("   Store: {}", config.storage_dir.display());
            Arc::new(
                FileStore::new(&config.storage_dir)
                    .await
                    .with_context(|| format!("opening {}", config.storage_dir.display()))?,
            )
        }
        StoreBackend::LibSql => {
            eprintln!("   Store: {} (libsql)", config.db_path.display());
            Arc::new(
                LibSqlStore::new_local(&config.db_path)
                    .await
                    .with_context(|| format!("opening {}", config.db_path.display()))?,
            )
        }
    };
    let memory = Arc::new(ConversationMemory::with_max_history(store, config.max_history));

    // ── Capabilities ────────────────────────────────────────────────────
    let registry = Arc::new(CapabilityRegistry::new());
    if let Some(weather) = &config.weather {
        let capability = WeatherCapability::new(weather.api_key.clone(), weather.api_url.clone())?;
        registry.register_agent(Arc::new(capability)).await;
    }
    let agents = registry.agent_names().await;
    eprintln!(
        "   Agents: {}",
        if agents.is_empty() {
            "none".to_string()
        } else {
            agents.join(", ")
        }
    );

    let taxonomy = config.taxonomy();
    for agent in taxonomy.agents() {
        if !agents.iter().any(|a| a == agent) {
            tracing::debug!(capability = agent, "Taxonomy agent has no provider");
        }
    }

    let classifier = IntentClassifier::new(llm.clone(), taxonomy)
        .with_temperature(config.temperature)
        .with_timeout(config.oracle_timeout);
    let responder = ConversationResponder::new(llm.clone())
        .with_temperature(config.temperature)
        .with_timeout(config.oracle_timeout);
    let dispatcher = Dispatcher::new(registry)
        .with_document_top_k(config.document_top_k)
        .with_timeout(config.provider_timeout);

    let router = Arc::new(RequestRouter::new(
        RouterConfig {
            history_window: config.router_history,
        },
        RouterDeps {
            memory,
            classifier: Arc::new(classifier),
            dispatcher: Arc::new(dispatcher),
            responder: Arc::new(responder),
        },
    ));

    // ── HTTP API ────────────────────────────────────────────────────────
    if let Some(port) = config.http_port {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("binding HTTP port {port}"))?;
        let app = api_routes(Arc::clone(&router));
        eprintln!("   HTTP API: http://0.0.0.0:{port}/api/chat");
        tokio::spawn(async move {
            tracing::info!(port, "HTTP API started");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "HTTP API stopped");
            }
        });
    }

    eprintln!("   Type a message and press Enter. /new for a new conversation, /quit to exit.\n");
    let mut session = CliSession::new(Arc::clone(&router), "local-user");
    session.run_stdio().await?;

    if config.http_port.is_some() {
        eprintln!("stdin closed; HTTP API still running. Ctrl-C to stop.");
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

/// stderr logging, plus a daily rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "assist-router.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    guard
}
