use std::env;

use capview_relay::config::{DEFAULT_CONFIG_FILE, loader::load_config};
use capview_relay::{RelayServer, observability};

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    observability::init_tracing();

    let config_path = env::var("CAPVIEW_RELAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(
        path = %config_path,
        allow_http = cfg.allow_http,
        timeout_secs = cfg.timeout_secs,
        "Configuration loaded"
    );

    let server = match RelayServer::new(&cfg) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Startup error: {e}");
            std::process::exit(2);
        }
    };
    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "relay stopped with an error");
        std::process::exit(1);
    }
}
