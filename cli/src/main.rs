//! hookrelay binary: subscribe to a webhook proxy's event stream and re-deliver
//! each webhook to a local HTTP endpoint.
//!
//! Settings come from flags or `HOOKRELAY_*` variables; `.env` and
//! `$XDG_CONFIG_HOME/hookrelay/config.toml` fill in variables that are not set.

mod logging;

use std::time::Duration;

use clap::{ArgAction, Parser};
use hookrelay::{run_relay, ConfigError, RelayConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "hookrelay", version, disable_version_flag = true)]
#[command(about = "Relay webhooks from an event-stream proxy (e.g. smee.io) to a local HTTP target")]
struct Args {
    /// Proxy channel URL to subscribe to
    #[arg(short = 'u', long = "url", env = "HOOKRELAY_URL", value_name = "URL")]
    url: String,

    /// URL each webhook is POSTed to
    #[arg(short, long, env = "HOOKRELAY_TARGET", value_name = "URL")]
    target: String,

    /// Shared secret; when set, deliveries without a valid x-hub-signature are dropped
    #[arg(
        short,
        long,
        env = "HOOKRELAY_SECRET",
        value_name = "SECRET",
        hide_env_values = true
    )]
    secret: Option<String>,

    /// Envelope key forwarded as a request header (repeatable).
    /// Default: x-github-event, x-github-delivery
    #[arg(
        long = "header",
        env = "HOOKRELAY_HEADERS",
        value_name = "NAME",
        value_delimiter = ','
    )]
    headers: Vec<String>,

    /// Forward request timeout in seconds
    #[arg(long, env = "HOOKRELAY_TIMEOUT", value_name = "SECS", default_value_t = 30)]
    timeout: u64,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: (),
}

fn build_config(args: &Args) -> Result<RelayConfig, ConfigError> {
    let mut config = RelayConfig::new(&args.url, &args.target)?
        .with_forward_timeout(Duration::from_secs(args.timeout));
    if let Some(secret) = &args.secret {
        config = config.with_secret(secret.as_str());
    }
    if !args.headers.is_empty() {
        config = config.with_forward_headers(&args.headers)?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let loaded = config::load_and_apply("hookrelay", None);
    let _log_guard = logging::init()?;
    match &loaded {
        Ok(applied) if !applied.is_empty() => {
            debug!(keys = ?applied.keys.keys().collect::<Vec<_>>(), "applied config");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "ignoring unreadable config"),
    }

    let args = Args::parse();
    let relay_config = match build_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("hookrelay: {}", e);
            std::process::exit(2);
        }
    };
    debug!(config = ?relay_config, "configuration");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    match run_relay(&relay_config, cancel).await {
        Ok(stats) => {
            info!(
                received = stats.received,
                forwarded = stats.forwarded,
                "hookrelay stopped"
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("hookrelay: {}", e);
            std::process::exit(1);
        }
    }
}
