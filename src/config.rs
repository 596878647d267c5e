//! Paths & process-wide configuration.
//!
//! Mirrors the teacher's `platform` module shape (one resolver selected per
//! target OS) but generalized from "detect system proxy trust" to "resolve
//! the app data directory", per spec §6's Environment table.

use std::path::PathBuf;

/// App data directory per OS, with subdirectories for temp files, the CA, and
/// the bundled Firefox profile (provisioning itself is out of scope; we only
/// need the path it would live under).
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Resolve the OS-appropriate data directory, falling back to `~/.gleip`.
    pub fn resolve() -> Self {
        let data_dir = Self::platform_data_dir().unwrap_or_else(Self::fallback_dir);
        Self { data_dir }
    }

    #[cfg(target_os = "macos")]
    fn platform_data_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join("Library/Application Support/Gleip"))
    }

    #[cfg(target_os = "windows")]
    fn platform_data_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("Gleip"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    fn platform_data_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("Gleip"))
    }

    fn fallback_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gleip")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }

    pub fn ca_dir(&self) -> PathBuf {
        self.data_dir.join("ca")
    }

    pub fn firefox_profile_dir(&self) -> PathBuf {
        self.data_dir.join("browsers/firefox/profile")
    }
}

/// Whether `GLEIP_DEV_MODE=true` is set: disables telemetry (out of scope
/// here, so a no-op) and enables verbose logging.
pub fn dev_mode_enabled() -> bool {
    std::env::var("GLEIP_DEV_MODE")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Initialize `tracing` the way the teacher's `init_core` resolves
/// `RUST_LOG`, with `GLEIP_DEV_MODE` bumping the default level to `debug`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let default_level = if dev_mode_enabled() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Proxy listen configuration (spec §6: default `127.0.0.1:9090`).
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

impl ProxyConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
