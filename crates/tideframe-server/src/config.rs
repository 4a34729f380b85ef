//! Server configuration surface.
//!
//! The options the core recognizes; parsing them out of files is the
//! operator's problem (the binary populates this from flags).

use std::path::PathBuf;

/// Everything the server core needs to run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Binary-codec TCP listen address.
    pub listen: String,
    /// JSON-codec TCP listen address; `None` disables the listener.
    pub listen_json: Option<String>,
    /// UNIX control socket path for admin IPC; `None` disables it.
    pub unix_path: Option<PathBuf>,
    /// The server's own name (the `=name` identity).
    pub server_name: String,
    /// Optional server password required at register/signon.
    pub servpass: Option<String>,
    /// Whether direct registrations are permitted.
    pub allow_register: bool,
    /// TLS certificate path (PEM). Self-signed when absent.
    pub cert_path: Option<PathBuf>,
    /// TLS private key path (PEM).
    pub key_path: Option<PathBuf>,
    /// Log filter, e.g. `info` or `tideframe_server=debug`.
    pub log_level: String,
    /// Bound of the offline-target LRU cache.
    pub max_cache: usize,
    /// Storage backend name (`sqlite`, `memory`).
    pub storage_backend: String,
    /// Storage backend location.
    pub storage_path: PathBuf,
    /// Directory of numbered schema migration scripts.
    pub migrations_path: Option<PathBuf>,
    /// MOTD text file.
    pub motd_path: Option<PathBuf>,
    /// Validate peer hostnames via reverse DNS at connect time.
    pub resolve_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7266".to_string(),
            listen_json: Some("0.0.0.0:7267".to_string()),
            unix_path: Some(PathBuf::from("data/control")),
            server_name: "tideframe.example".to_string(),
            servpass: None,
            allow_register: true,
            cert_path: None,
            key_path: None,
            log_level: "info".to_string(),
            max_cache: 1024,
            storage_backend: "sqlite".to_string(),
            storage_path: PathBuf::from("data/store.db"),
            migrations_path: None,
            motd_path: Some(PathBuf::from("motd.txt")),
            resolve_hosts: true,
        }
    }
}
