use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Deserializer};

/// Command line surface. Every option can also come from the environment;
/// unset options fall back to the JSON config file and then to defaults
/// (precedence: flags > env > file > defaults).
#[derive(Debug, Default, Parser)]
#[command(name = "pulse-agent", about = "Host metrics collection agent")]
pub struct Cli {
    /// Server address, host:port or a full URL
    #[arg(short = 'a', long = "address", env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between metric reports
    #[arg(short = 'r', long = "report-interval", env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,

    /// Seconds between metric polls
    #[arg(short = 'p', long = "poll-interval", env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Shared HMAC key for request signing
    #[arg(short = 'k', long = "key", env = "KEY")]
    hash_key: Option<String>,

    /// Number of sender workers
    #[arg(short = 'l', long = "rate-limit", env = "RATE_LIMIT")]
    rate_limit: Option<usize>,

    /// Path to the server's RSA public key (PEM); enables batch encryption
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    crypto_key: Option<String>,

    /// Path to a JSON config file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    config: Option<String>,

    /// Send all metrics as one batch request instead of per-metric workers
    #[arg(short = 'b', long = "batch", env = "BATCH")]
    batch: Option<bool>,

    /// gRPC server endpoint; setting it switches reporting to gRPC
    #[arg(short = 'g', long = "grpc-endpoint", env = "GRPC_ENDPOINT")]
    grpc_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    address: Option<String>,
    #[serde(default, deserialize_with = "seconds_or_suffixed")]
    report_interval: Option<u64>,
    #[serde(default, deserialize_with = "seconds_or_suffixed")]
    poll_interval: Option<u64>,
    #[serde(default)]
    crypto_key: Option<String>,
    #[serde(default)]
    batch: Option<bool>,
    #[serde(default)]
    grpc_endpoint: Option<String>,
}

/// Accepts interval values either as plain seconds (`10`) or with the
/// legacy `s` suffix (`"10s"`).
fn seconds_or_suffixed<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Seconds(v)) => Ok(Some(v)),
        Some(Raw::Text(s)) => s
            .trim_end_matches('s')
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Normalized base URL (scheme always present).
    pub address: String,
    pub report_interval_secs: u64,
    pub poll_interval_secs: u64,
    /// Empty string disables request signing.
    pub hash_key: String,
    pub rate_limit: usize,
    /// Empty string disables batch encryption.
    pub crypto_key: String,
    pub batch: bool,
    /// Empty string keeps HTTP reporting.
    pub grpc_endpoint: String,
}

impl AgentConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::resolve(Cli::parse())
    }

    pub fn resolve(cli: Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("unable to read config file '{path}'"))?;
                serde_json::from_str::<FileConfig>(&content)
                    .with_context(|| format!("unable to parse config file '{path}'"))?
            }
            None => FileConfig::default(),
        };

        let address = cli
            .address
            .or(file.address)
            .unwrap_or_else(|| "localhost:8080".to_string());
        let address = if address.contains("://") {
            address
        } else {
            format!("http://{address}")
        };

        Ok(Self {
            address,
            report_interval_secs: cli.report_interval.or(file.report_interval).unwrap_or(10),
            poll_interval_secs: cli.poll_interval.or(file.poll_interval).unwrap_or(2),
            hash_key: cli.hash_key.unwrap_or_default(),
            rate_limit: cli.rate_limit.unwrap_or(5).max(1),
            crypto_key: cli.crypto_key.or(file.crypto_key).unwrap_or_default(),
            batch: cli.batch.or(file.batch).unwrap_or(true),
            grpc_endpoint: cli.grpc_endpoint.or(file.grpc_endpoint).unwrap_or_default(),
        })
    }

    /// Base URL with any trailing slash trimmed, for joining request paths.
    pub fn base_url(&self) -> &str {
        self.address.trim_end_matches('/')
    }

    /// gRPC endpoint URI, defaulting the scheme when only host:port is given.
    pub fn grpc_uri(&self) -> String {
        let addr = self.grpc_endpoint.trim();
        if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = AgentConfig::resolve(Cli::default()).unwrap();
        assert_eq!(config.address, "http://localhost:8080");
        assert_eq!(config.report_interval_secs, 10);
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.rate_limit, 5);
        assert!(config.batch);
        assert!(config.hash_key.is_empty());
    }

    #[test]
    fn file_values_fill_unset_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(
            &path,
            r#"{"address":"example:9000","report_interval":"3s","poll_interval":1,"batch":false}"#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(path.to_string_lossy().to_string()),
            report_interval: Some(7),
            ..Cli::default()
        };
        let config = AgentConfig::resolve(cli).unwrap();

        // Flag beats file; file beats default.
        assert_eq!(config.report_interval_secs, 7);
        assert_eq!(config.poll_interval_secs, 1);
        assert_eq!(config.address, "http://example:9000");
        assert!(!config.batch);
    }

    #[test]
    fn address_scheme_is_preserved() {
        let cli = Cli {
            address: Some("https://metrics.internal:8443/".to_string()),
            ..Cli::default()
        };
        let config = AgentConfig::resolve(cli).unwrap();
        assert_eq!(config.base_url(), "https://metrics.internal:8443");
    }

    #[test]
    fn grpc_uri_gains_scheme() {
        let cli = Cli {
            grpc_endpoint: Some("localhost:9090".to_string()),
            ..Cli::default()
        };
        let config = AgentConfig::resolve(cli).unwrap();
        assert_eq!(config.grpc_uri(), "http://localhost:9090");
    }
}
