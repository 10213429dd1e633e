mod cache;
mod commands;
mod config;
mod device;
mod enrichment;
mod error;
mod handlers;
mod lookups;
mod models;
mod orchestrator;
mod parsing;
mod router;
mod utils;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cache::{CacheGate, CacheNamespace};
use config::{Config, IpToAsnSource, LgConfig};
use device::SshExecutor;
use enrichment::{Enricher, LookupCaches, Lookups};
use lookups::{
    AsRankClient, CommunityStore, CymruLookup, DnsReverseLookup, IpToAsnLookup, RouteViewsLookup,
};
use orchestrator::Orchestrator;
use parsing::{OutputProcessor, TemplateRegistry};

/// Application state shared across handlers
pub struct AppState {
    pub lg: Arc<LgConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub processor: OutputProcessor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "looking_glass=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!("Starting Looking Glass Server");
    tracing::info!("Config file: {}", cfg.config_file);
    tracing::info!("Templates: {}", cfg.templates_dir);
    tracing::info!("Listen: {}", cfg.listen_addr);

    let lg = Arc::new(LgConfig::load(&cfg.config_file)?);
    tracing::info!("Loaded {} location(s) for '{}'", lg.locations.len(), lg.title);

    let templates = TemplateRegistry::load(&cfg.templates_dir)?;

    // Community database is rebuilt from the text files on every start
    let communities = CommunityStore::new(&cfg.community_db)
        .await
        .with_context(|| format!("Failed to open community database {}", cfg.community_db))?;
    match communities.rebuild(&cfg.community_dirs).await {
        Ok(count) => tracing::info!("Community database initialized ({} entries)", count),
        Err(e) => tracing::warn!("Failed to rebuild community database: {}", e),
    }

    let asrank = AsRankClient::new(&cfg.asrank_url, Duration::from_secs(cfg.http_timeout_secs))?;
    let resolver = lookups::resolver::system_resolver();
    let ip_to_asn: Arc<dyn IpToAsnLookup> = match lg.ip_to_asn_source {
        IpToAsnSource::Cymru => Arc::new(CymruLookup::new(resolver.clone())),
        IpToAsnSource::Routeviews => Arc::new(RouteViewsLookup::new(resolver.clone())),
    };

    // Shared cache, emptied at startup
    let store = cache::open_store(&lg.cache).await;
    store.clear().await;
    if lg.cache.enabled {
        tracing::info!("Cache enabled (namespace={})", lg.cache.namespace);
    }

    let enricher = Enricher::new(
        Lookups {
            communities: Arc::new(communities),
            asn_info: Arc::new(asrank),
            ip_to_asn,
            reverse_dns: Arc::new(DnsReverseLookup::new(resolver)),
        },
        LookupCaches::from_config(store.clone(), &lg.cache),
        lg.resolve_traceroute_hops,
    );

    let command_cache = CacheGate::from_config(store, &lg.cache, CacheNamespace::Command);
    if command_cache.is_enabled() {
        tracing::info!("Command output cached for {}s", lg.cache.commands.ttl);
    }
    let orchestrator = Arc::new(Orchestrator::new(
        lg.clone(),
        Arc::new(SshExecutor::default()),
        command_cache,
    ));
    let processor = OutputProcessor::new(lg.clone(), Arc::new(templates), Arc::new(enricher));

    // Create app state
    let state = Arc::new(AppState {
        lg,
        orchestrator,
        processor,
    });

    // Build router
    let app = router::build(state, &cfg.cors_origins);

    // Start server
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!("Looking Glass listening on {}", cfg.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Looking Glass shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
