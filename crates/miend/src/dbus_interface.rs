use crate::engine::{EngineError, EngineHandle};
use mien_store::ProfileStore;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.mien.Mien1";
pub const OBJECT_PATH: &str = "/org/mien/Mien1";

/// D-Bus interface for the mien recognition daemon.
pub struct MienService {
    pub engine: EngineHandle,
    pub store: Arc<Mutex<ProfileStore>>,
}

impl MienService {
    fn store_lock(&self) -> std::sync::MutexGuard<'_, ProfileStore> {
        self.store.lock().expect("store mutex poisoned")
    }
}

fn failed(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.mien.Mien1")]
impl MienService {
    /// Enroll a profile from photo files. Returns the number of
    /// embeddings stored.
    async fn enroll(&self, name: String, photos: Vec<String>) -> zbus::fdo::Result<u32> {
        tracing::info!(name, photos = photos.len(), "enroll requested");
        let paths: Vec<PathBuf> = photos.into_iter().map(PathBuf::from).collect();
        let count = self
            .engine
            .enroll_photos(name, paths)
            .await
            .map_err(failed)?;
        Ok(count as u32)
    }

    /// Enroll a profile from a live camera capture.
    async fn enroll_live(&self, name: String) -> zbus::fdo::Result<u32> {
        tracing::info!(name, "live enrollment requested");
        let count = self.engine.enroll_live(name).await.map_err(failed)?;
        Ok(count as u32)
    }

    /// Acquire the camera and start recognition polling.
    async fn start_recognition(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start recognition requested");
        self.engine.start_recognition().await.map_err(failed)
    }

    /// Stop recognition, cancelling any running countdown.
    async fn stop_recognition(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop recognition requested");
        self.engine.stop_recognition().await.map_err(failed)
    }

    /// Cancel a running countdown; recognition resumes scanning.
    async fn cancel_countdown(&self) -> zbus::fdo::Result<()> {
        tracing::info!("countdown cancel requested");
        self.engine.cancel_countdown().await.map_err(failed)
    }

    /// Enrolled profiles as a JSON array, in insertion order.
    async fn list_profiles(&self) -> zbus::fdo::Result<String> {
        let store = self.store_lock();
        let entries: Vec<serde_json::Value> = store
            .profiles()
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "name": p.name,
                    "dateAdded": p.created_at,
                    "embeddings": p.embeddings.len(),
                    "hasThumbnail": store.thumbnail(&p.name).is_some(),
                })
            })
            .collect();
        Ok(serde_json::Value::Array(entries).to_string())
    }

    /// Remove one enrolled profile by name.
    async fn remove_profile(&self, name: String) -> zbus::fdo::Result<()> {
        tracing::info!(name, "remove requested");
        self.store_lock()
            .remove(&name)
            .map_err(|e| failed(e.into()))
    }

    /// Remove every enrolled profile.
    async fn clear_all(&self) -> zbus::fdo::Result<u32> {
        let mut store = self.store_lock();
        let removed = store.len() as u32;
        store.clear().map_err(|e| failed(e.into()))?;
        tracing::info!(removed, "store cleared");
        Ok(removed)
    }

    /// Daemon status as a JSON object.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "phase": status.phase,
            "profiles": status.profiles,
            "camera_active": status.camera_active,
        })
        .to_string())
    }

    /// Session transition stream for the presentation layer. The payload
    /// is one JSON object per transition (`kind` discriminates).
    #[zbus(signal)]
    pub async fn state_changed(emitter: &SignalEmitter<'_>, event: String) -> zbus::Result<()>;
}
