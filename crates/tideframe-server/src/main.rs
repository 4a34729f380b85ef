//! Tideframe server binary.
//!
//! # Usage
//!
//! ```bash
//! # Development: self-signed certificate, sqlite store in ./data
//! tideframe-server --name chat.example.net
//!
//! # Production
//! tideframe-server --name chat.example.net \
//!     --cert cert.pem --key key.pem --store data/store.db
//! ```

use std::path::PathBuf;

use clap::Parser;
use tideframe_server::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tideframe conversation server
#[derive(Parser, Debug)]
#[command(name = "tideframe-server")]
#[command(about = "Real-time multi-user conversation server")]
#[command(version)]
struct Args {
    /// Binary-protocol listen address
    #[arg(long, default_value = "0.0.0.0:7266")]
    listen: String,

    /// JSON-protocol listen address
    #[arg(long, default_value = "0.0.0.0:7267")]
    listen_json: String,

    /// Admin control socket path
    #[arg(long, default_value = "data/control")]
    unix_socket: PathBuf,

    /// Server name
    #[arg(short, long, default_value = "tideframe.example")]
    name: String,

    /// Server password required at register/signon
    #[arg(long)]
    servpass: Option<String>,

    /// Refuse direct registrations
    #[arg(long)]
    no_register: bool,

    /// Path to TLS certificate (PEM format)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to TLS private key (PEM format)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Offline-target cache size
    #[arg(long, default_value = "1024")]
    max_cache: usize,

    /// Storage backend (sqlite, memory)
    #[arg(long, default_value = "sqlite")]
    storage: String,

    /// Storage location
    #[arg(long, default_value = "data/store.db")]
    store: PathBuf,

    /// Directory of numbered schema migration scripts
    #[arg(long)]
    migrations: Option<PathBuf>,

    /// MOTD text file
    #[arg(long, default_value = "motd.txt")]
    motd: PathBuf,

    /// Skip reverse-DNS validation of peers
    #[arg(long)]
    no_rdns: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(name = %args.name, "tideframe server starting");
    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("no TLS certificate provided, a self-signed one will be generated");
    }

    let config = Config {
        listen: args.listen,
        listen_json: Some(args.listen_json),
        unix_path: Some(args.unix_socket),
        server_name: args.name,
        servpass: args.servpass,
        allow_register: !args.no_register,
        cert_path: args.cert,
        key_path: args.key,
        log_level: args.log_level,
        max_cache: args.max_cache,
        storage_backend: args.storage,
        storage_path: args.store,
        migrations_path: args.migrations,
        motd_path: Some(args.motd),
        resolve_hosts: !args.no_rdns,
    };

    tideframe_server::run(config).await
}
