use std::sync::Arc;

use tokio::signal;
use tracing::info;

use hat_core::GameStore;
use hat_persistence::connection::connect_and_migrate;
use hat_persistence::repositories::{GameRepository, UserRepository};
use hat_server::{auth::TokenService, config::Config, create_routes, registry::Registry};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    info!("Starting hatgame server...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let db = match connect_and_migrate(&config.database_url).await {
        Ok(db) => db,
        Err(error) => {
            tracing::error!(%error, "failed to connect to database and run migrations");
            std::process::exit(1);
        }
    };
    info!("Connected to database and ran migrations");

    // Tokens are signed with a per-process secret: restarting the server
    // invalidates every session.
    let tokens = Arc::new(TokenService::new(config.token_ttl_minutes));
    let users = Arc::new(UserRepository::new(db.clone()));
    let games = Arc::new(GameRepository::new(db));
    let registry = Registry::new(games.clone() as Arc<dyn GameStore>);

    let routes = create_routes(registry, tokens, users, games);

    let addr = match config.host.parse::<std::net::IpAddr>() {
        Ok(ip) => (ip, config.port),
        Err(error) => {
            tracing::error!(%error, host = config.host, "invalid listen address");
            std::process::exit(1);
        }
    };

    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        #[cfg(unix)]
        {
            let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
                Ok(signal) => signal,
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGINT handler");
                    return;
                }
            };
            let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
            }
        }

        #[cfg(not(unix))]
        {
            if signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
            }
        }
    });

    info!("Server started on {}. Press Ctrl+C to stop.", addr);
    server.await;
    info!("Server shutdown complete.");
}
