mod cli;
mod commands;
mod config;
mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use capview_core::capability::rest_base_url;
use capview_core::{
    FetchRequest, ResilientFetcher, ReqwestTransport, TestSession, TestTarget, Transport,
    TransportConfig,
};

use cli::{Cli, Commands, OutputFormat};
use config::ProfileConfig;
use output::print_error;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn init_tracing() {
    // Quiet by default; RUST_LOG opts into pipeline diagnostics.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let profile = &cli.profile;
    let cfg = config::load_profile(profile)?;
    let format = resolve_format(cli.format, &cfg);

    match &cli.command {
        Commands::Config(args) => match &args.command {
            cli::ConfigCommands::Show => {
                println!("{}: {}", "Profile".cyan(), profile);
                println!("{}: {}", "Server".cyan(), cfg.server.as_deref().unwrap_or("(not set)"));
                println!("{}: {}", "Format".cyan(), cfg.format.as_deref().unwrap_or("table"));
                println!(
                    "{}: {}",
                    "Relay A".cyan(),
                    cfg.relay_a()
                        .map(|r| format!("{}:{}", r.kind.as_str(), r.base_url))
                        .unwrap_or_else(|| "off".into())
                );
                println!(
                    "{}: {}",
                    "Relay B".cyan(),
                    cfg.relay_b()
                        .map(|r| format!("{}:{}", r.kind.as_str(), r.base_url))
                        .unwrap_or_else(|| "off".into())
                );
                println!("{}: {}", "Viewer".cyan(), cfg.viewer.as_deref().unwrap_or("(not set)"));
            }
            cli::ConfigCommands::Set(set_args) => {
                let mut cfg = cfg.clone();
                if set_args.key == "format" {
                    OutputFormat::from_str(&set_args.value, true)
                        .map_err(|e| anyhow::anyhow!("Invalid format: {e}"))?;
                }
                cfg.set(&set_args.key, &set_args.value)?;
                config::save_profile(profile, &cfg)?;
                output::print_success(&format!("Set {} = {}", set_args.key, set_args.value));
            }
        },
        Commands::Load(args) => {
            let url = resolve_url(args.url.as_deref(), &cli, &cfg)?;
            let fetcher = make_fetcher(&cli, &cfg)?;
            commands::capability::load(&fetcher, &url, cli.token.as_deref(), args, format).await?;
        }
        Commands::Resources(args) => {
            let url = resolve_url(args.url.as_deref(), &cli, &cfg)?;
            let fetcher = make_fetcher(&cli, &cfg)?;
            commands::capability::resources(&fetcher, &url, cli.token.as_deref(), args, format).await?;
        }
        Commands::Permalink(args) => {
            let url = resolve_url(args.url.as_deref(), &cli, &cfg)?;
            let viewer = args
                .viewer
                .as_deref()
                .or(cfg.viewer.as_deref())
                .context("No viewer URL configured. Use --viewer or run: capview config set viewer <url>")?;
            commands::capability::permalink(viewer, &url)?;
        }
        Commands::Test(args) => {
            let url = config::resolve_server(cli.server.as_deref(), &cfg)?;
            let target = if args.command.loads_capability() {
                // Metadata is loaded without the token so relay fallback stays available.
                let fetcher = make_fetcher(&cli, &cfg)?;
                let request = FetchRequest::parse(&url)?;
                let doc = commands::capability::load_document(&fetcher, &request, format).await?;
                TestTarget::from_capability(&doc, cli.token.clone())
            } else {
                TestTarget::new(rest_base_url(&url), cli.token.clone())
            };
            let mut session = TestSession::with_relay(make_transport(cli.timeout)?, cfg.relay_a());
            commands::test::run(&mut session, &target, &args.command, format).await?;
        }
    }

    Ok(())
}

fn resolve_format(flag: Option<OutputFormat>, cfg: &ProfileConfig) -> OutputFormat {
    flag.or_else(|| {
        cfg.format
            .as_deref()
            .and_then(|f| OutputFormat::from_str(f, true).ok())
    })
    .unwrap_or_default()
}

fn resolve_url(positional: Option<&str>, cli: &Cli, cfg: &ProfileConfig) -> Result<String> {
    match positional {
        Some(url) => Ok(url.to_string()),
        None => config::resolve_server(cli.server.as_deref(), cfg),
    }
}

fn make_transport(timeout: Option<u64>) -> Result<Arc<dyn Transport>> {
    let transport = ReqwestTransport::new(&TransportConfig {
        timeout: timeout.map(Duration::from_secs),
        ..Default::default()
    })
    .context("Failed to create HTTP client")?;
    Ok(Arc::new(transport))
}

fn make_fetcher(cli: &Cli, cfg: &ProfileConfig) -> Result<ResilientFetcher> {
    Ok(ResilientFetcher::with_relays(
        make_transport(cli.timeout)?,
        cfg.relay_a(),
        cfg.relay_b(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_format_prefers_flag_then_profile() {
        let cfg = ProfileConfig {
            format: Some("JSON".into()),
            ..Default::default()
        };
        assert_eq!(resolve_format(None, &cfg), OutputFormat::Json);
        assert_eq!(resolve_format(Some(OutputFormat::Table), &cfg), OutputFormat::Table);
        assert_eq!(resolve_format(None, &ProfileConfig::default()), OutputFormat::Table);
    }
}
