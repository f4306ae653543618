//! `safe-fetch` command line.
//!
//! Fetches one URL through the guard and writes the body to stdout. Logs and
//! `--stats` go to stderr.
//!
//! Exit codes: 0 success, 1 guarded request failed, 2 bad configuration or
//! arguments.

use clap::Parser;
use hyper::header::{HeaderName, HeaderValue};
use hyper::Method;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use safe_fetch::config::{load_config, GuardConfig};
use safe_fetch::observability::logging;
use safe_fetch::{RequestOptions, SafeClient};

#[derive(Parser)]
#[command(name = "safe-fetch")]
#[command(about = "Fetch a URL with SSRF checks and byte limits", long_about = None)]
struct Cli {
    /// Target URL
    url: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ceiling for raw bytes read off the wire
    #[arg(long)]
    network_limit: Option<u64>,

    /// Ceiling for response body bytes before decoding
    #[arg(long)]
    encoded_limit: Option<u64>,

    /// Ceiling for response body bytes after decoding
    #[arg(long)]
    decoded_limit: Option<u64>,

    /// Idle timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header, `name: value`; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Decode the body as UTF-8 text
    #[arg(long)]
    text: bool,

    /// Print byte counters as JSON to stderr
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("safe-fetch: {}: {e}", path.display());
                return ExitCode::from(2);
            }
        },
        None => GuardConfig::default(),
    };

    logging::init(&config.observability.log_level);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "safe-fetch starting");

    let options = match build_options(&cli) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("safe-fetch: {e}");
            return ExitCode::from(2);
        }
    };

    let client = match SafeClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("safe-fetch: {e}");
            return ExitCode::from(2);
        }
    };

    let done = client.fetch(options).await;

    if cli.stats {
        match serde_json::to_string(&done.stats) {
            Ok(json) => eprintln!("{json}"),
            Err(e) => tracing::error!(error = %e, "Failed to encode stats"),
        }
    }

    match done.into_result() {
        Ok(body) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(body.as_bytes()).and_then(|()| stdout.flush()) {
                eprintln!("safe-fetch: {e}");
                return ExitCode::from(1);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("safe-fetch: {} ({})", e, e.kind());
            ExitCode::from(1)
        }
    }
}

fn build_options(cli: &Cli) -> Result<RequestOptions, Box<dyn std::error::Error>> {
    let mut options = RequestOptions::new(cli.url.clone()).method(Method::from_bytes(cli.method.to_uppercase().as_bytes())?);

    for raw in &cli.headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| format!("header {raw:?} is not `name: value`"))?;
        options = options.header(HeaderName::from_bytes(name.trim().as_bytes())?, HeaderValue::from_str(value.trim())?);
    }

    options.network_limit = cli.network_limit;
    options.encoded_limit = cli.encoded_limit;
    options.decoded_limit = cli.decoded_limit;
    options.timeout = cli.timeout_ms.map(Duration::from_millis);
    if cli.text {
        options = options.text();
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_options() {
        let cli = Cli::parse_from([
            "safe-fetch",
            "https://example.com",
            "-X",
            "post",
            "-H",
            "X-Token: abc",
            "--decoded-limit",
            "2048",
            "--timeout-ms",
            "500",
        ]);
        let options = build_options(&cli).unwrap();
        assert_eq!(options.method, Some(Method::POST));
        assert_eq!(options.headers["x-token"], "abc");
        assert_eq!(options.decoded_limit, Some(2048));
        assert_eq!(options.timeout, Some(Duration::from_millis(500)));
        assert!(options.network_limit.is_none());
    }

    #[test]
    fn test_malformed_header() {
        let cli = Cli::parse_from(["safe-fetch", "https://example.com", "-H", "no-colon"]);
        assert!(build_options(&cli).is_err());
    }
}
