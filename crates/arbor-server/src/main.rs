//! Arbor tree binary: the federation endpoint of one tree.
//!
//! Loads configuration and the tree key, prepares the database, then accepts
//! peer connections and keeps links to configured peers until SIGTERM or
//! SIGINT.

use arbor_federation::KeyStore;
use arbor_server::config::{self, Config};
use arbor_server::{listener, peers, AppState};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("ARBOR_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn load_keys(config: &Config) -> KeyStore {
    let path = &config.keys.private_key_path;
    if config.keys.generate && !path.exists() {
        KeyStore::generate_to(path).expect("failed to generate tree key")
    } else {
        KeyStore::load(path)
            .expect("failed to load tree key: check keys.private_key_path or set keys.generate")
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("arbor.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the tree cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let keys = load_keys(&config);

    let pool = arbor_db::create_pool(
        &config.database.path,
        arbor_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool: check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = arbor_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
        let local = arbor_store::nodes::ensure_local_node(
            &conn,
            &config.server.domain,
            &keys.public_key_hex(),
        )
        .expect("failed to record the local node");
        tracing::info!(domain = %local.domain, public_key = %local.public_key, "tree identity");
        peers::register_peers(&conn, &config.peers).expect("failed to record configured peers");
    }

    let state = AppState::new(
        pool,
        config.server.domain.clone(),
        keys,
        config.server.handshake_timeout(),
    );
    let links = peers::spawn_peer_links(&state, &config.peers);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    tracing::info!(%addr, domain = %state.domain, "starting arbor tree");

    let tcp = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    listener::serve(tcp, state, shutdown_signal()).await;

    for link in links {
        link.abort();
    }
    tracing::info!("arbor tree shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
        () = terminate => { tracing::info!("received SIGTERM, shutting down"); }
    }
}
