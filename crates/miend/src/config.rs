use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Directory holding the profile snapshots.
    pub store_dir: PathBuf,
    /// Maximum Euclidean distance accepted as a positive match.
    pub match_threshold: f32,
    /// Consecutive matching ticks required before the countdown starts.
    pub confirm_streak: u32,
    /// Confirmation countdown duration in seconds.
    pub countdown_secs: u32,
    /// Recognition polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Number of frames to capture per live enrollment.
    pub frames_per_enroll: usize,
}

impl Config {
    /// Load configuration from `MIEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("MIEND_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| mien_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("mien");

        let store_dir = std::env::var("MIEND_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("profiles"));

        Self {
            camera_device: std::env::var("MIEND_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            store_dir,
            match_threshold: env_f32("MIEND_MATCH_THRESHOLD", mien_core::DEFAULT_MATCH_THRESHOLD),
            confirm_streak: env_u32(
                "MIEND_CONFIRM_STREAK",
                mien_core::session::DEFAULT_CONFIRM_STREAK,
            ),
            countdown_secs: env_u32(
                "MIEND_COUNTDOWN_SECS",
                mien_core::session::DEFAULT_COUNTDOWN_SECS,
            ),
            poll_interval_ms: env_u64("MIEND_POLL_INTERVAL_MS", 1000),
            frames_per_enroll: env_usize("MIEND_FRAMES_PER_ENROLL", 5),
        }
    }

    /// Path to the UltraFace detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("version-RFB-320.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the MobileFaceNet embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("mobilefacenet.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
