use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Deserializer};

/// Command line surface; every option also reads from the environment.
/// Precedence: flags > env > JSON config file > defaults.
#[derive(Debug, Default, Parser)]
#[command(name = "pulse-server", about = "Metrics ingestion server")]
pub struct Cli {
    /// Listen address, host:port
    #[arg(short = 'a', long = "address", env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between state snapshots (0 = snapshot only on shutdown)
    #[arg(short = 'i', long = "store-interval", env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Snapshot file for the in-memory engine
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    store_file: Option<String>,

    /// Restore in-memory state from the snapshot file on startup
    #[arg(short = 'r', long = "restore", env = "RESTORE")]
    restore: Option<bool>,

    /// Database path; non-empty selects the relational engine
    #[arg(short = 'd', long = "database-dsn", env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Shared HMAC key for request verification
    #[arg(short = 'k', long = "key", env = "KEY")]
    hash_key: Option<String>,

    /// File receiving one audit record per ingested batch
    #[arg(long = "audit-file", env = "AUDIT_FILE")]
    audit_file: Option<String>,

    /// URL receiving a POST per ingested batch
    #[arg(long = "audit-url", env = "AUDIT_URL")]
    audit_url: Option<String>,

    /// Path to the RSA private key (PEM); enables batch decryption
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    crypto_key: Option<String>,

    /// Trusted source subnet (CIDR or bare IP) for gRPC ingestion
    #[arg(short = 't', long = "trusted-subnet", env = "TRUSTED_SUBNET")]
    trusted_subnet: Option<String>,

    /// Serve the gRPC endpoint instead of HTTP
    #[arg(short = 'g', long = "grpc", env = "GRPC")]
    grpc: Option<bool>,

    /// Path to a JSON config file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    config: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    address: Option<String>,
    #[serde(default, deserialize_with = "seconds_or_suffixed")]
    store_interval: Option<u64>,
    #[serde(default)]
    store_file: Option<String>,
    #[serde(default)]
    restore: Option<bool>,
    #[serde(default)]
    database_dsn: Option<String>,
    #[serde(default)]
    crypto_key: Option<String>,
    #[serde(default)]
    trusted_subnet: Option<String>,
}

/// Accepts interval values either as plain seconds (`300`) or with the
/// legacy `s` suffix (`"300s"`).
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
pub struct ServerConfig {
    pub address: String,
    pub store_interval_secs: u64,
    pub store_file: String,
    pub restore: bool,
    pub database_dsn: String,
    pub hash_key: String,
    pub audit_file: String,
    pub audit_url: String,
    pub crypto_key: String,
    pub trusted_subnet: String,
    pub grpc: bool,
}

impl ServerConfig {
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

        Ok(Self {
            address: cli
                .address
                .or(file.address)
                .unwrap_or_else(|| "localhost:8080".to_string()),
            store_interval_secs: cli.store_interval.or(file.store_interval).unwrap_or(300),
            store_file: cli
                .store_file
                .or(file.store_file)
                .unwrap_or_else(|| "metrics_database.json".to_string()),
            restore: cli.restore.or(file.restore).unwrap_or(false),
            database_dsn: cli.database_dsn.or(file.database_dsn).unwrap_or_default(),
            hash_key: cli.hash_key.unwrap_or_default(),
            audit_file: cli.audit_file.unwrap_or_default(),
            audit_url: cli.audit_url.unwrap_or_default(),
            crypto_key: cli.crypto_key.or(file.crypto_key).unwrap_or_default(),
            trusted_subnet: cli
                .trusted_subnet
                .or(file.trusted_subnet)
                .unwrap_or_default(),
            grpc: cli.grpc.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = ServerConfig::resolve(Cli::default()).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.store_interval_secs, 300);
        assert_eq!(config.store_file, "metrics_database.json");
        assert!(!config.restore);
        assert!(!config.grpc);
        assert!(config.database_dsn.is_empty());
    }

    #[test]
    fn file_values_fill_unset_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(
            &path,
            r#"{"address":"0.0.0.0:9000","store_interval":"30s","restore":true}"#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(path.to_string_lossy().to_string()),
            address: Some("localhost:7000".to_string()),
            ..Cli::default()
        };
        let config = ServerConfig::resolve(cli).unwrap();

        assert_eq!(config.address, "localhost:7000");
        assert_eq!(config.store_interval_secs, 30);
        assert!(config.restore);
    }

    #[test]
    fn unreadable_config_file_is_fatal() {
        let cli = Cli {
            config: Some("/definitely/missing.json".to_string()),
            ..Cli::default()
        };
        assert!(ServerConfig::resolve(cli).is_err());
    }
}
