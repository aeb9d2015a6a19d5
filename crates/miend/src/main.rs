use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{MienService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("miend starting");

    let config = config::Config::from_env();
    let store = Arc::new(Mutex::new(mien_store::ProfileStore::open(
        &config.store_dir,
    )?));
    let engine = engine::spawn_engine(&config, store.clone())?;

    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(
            OBJECT_PATH,
            MienService {
                engine: engine.clone(),
                store,
            },
        )?
        .build()
        .await?;

    // Forward engine transitions to the StateChanged signal.
    let mut events = engine.subscribe();
    let signal_conn = connection.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(transition) => {
                    let payload = match serde_json::to_string(&transition) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(error = %e, "unserializable transition");
                            continue;
                        }
                    };
                    let emitter = match SignalEmitter::new(&signal_conn, OBJECT_PATH) {
                        Ok(e) => e,
                        Err(e) => {
                            tracing::warn!(error = %e, "signal emitter unavailable");
                            continue;
                        }
                    };
                    if let Err(e) = MienService::state_changed(&emitter, payload).await {
                        tracing::warn!(error = %e, "failed to emit StateChanged");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "transition stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tracing::info!(bus = BUS_NAME, "miend ready");

    tokio::signal::ctrl_c().await?;
    // Release the camera before exiting.
    let _ = engine.stop_recognition().await;
    tracing::info!("miend shutting down");

    Ok(())
}
