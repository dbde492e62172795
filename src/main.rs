use anyhow::anyhow;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use galleri::config::AppConfig;
use galleri::domain::post::FeedQuery;
use galleri::infra::{db::Db, documents::PgDocumentStore, storage::ObjectStorage};
use galleri::{http, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let viewer = config.viewer()?;

    let db = Db::connect(&config).await?;
    db.migrate().await?;
    let documents = Arc::new(PgDocumentStore::new(db));
    let storage = Arc::new(ObjectStorage::new(&config).await?);

    let state = AppState::new(
        documents.clone(),
        documents,
        storage,
        viewer.clone(),
        config.upload_max_bytes,
    );

    let backoff = Duration::from_millis(config.feed_restart_backoff_ms);
    let mut queries = vec![FeedQuery::Discover];
    if let Some(viewer) = &viewer {
        queries.push(FeedQuery::Gallery {
            owner_id: viewer.id,
        });
    }
    for query in queries {
        let feed = state.feed();
        let store = state.store.clone();
        tokio::spawn(async move {
            if let Err(err) = jobs::feed_sync::run(feed, store, query, backoff).await {
                tracing::error!(error = ?err, query = ?query, "feed sync exited");
            }
        });
    }

    match config.app_mode.as_str() {
        "api" => {
            let app: Router = http::router(state.clone()).layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            );
            let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
            tracing::info!("listening on {}", config.http_addr);

            // Closing the store ends open event streams so shutdown can finish.
            let store = state.store.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    store.close();
                })
                .await?;
        }
        "watch" => {
            tracing::info!("starting watch mode");
            tokio::select! {
                result = jobs::feed_sync::log_events(state.store.clone()) => {
                    result?;
                }
                _ = shutdown_signal() => {}
            }
        }
        other => return Err(anyhow!("unknown APP_MODE: {}", other)),
    }

    state.store.close();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
