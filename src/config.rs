use crate::services::{extractor::StorageLayout, validator::MAX_TOTAL_BYTES};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL clients use to reach this service; presigned URLs start with it.
    pub public_base_url: String,
    pub signing_secret: String,
    pub upload_url_ttl: Duration,
    pub uploads_bucket: String,
    pub apps_bucket: String,
    pub storage_layout: StorageLayout,
    /// Cap on the decompressed contents of one uploaded package.
    pub max_package_bytes: u64,
    pub queue: QueueSettings,
}

/// Polling behaviour shared by the background consumers.
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    pub max_receive_count: i64,
    pub batch_size: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            visibility_timeout: Duration::from_secs(60),
            max_receive_count: 5,
            batch_size: 10,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Web/ML app publishing and catalog service")]
pub struct Args {
    /// Host to bind to (overrides APPSTORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides APPSTORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides APPSTORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides APPSTORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL used in presigned upload URLs (overrides APPSTORE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Lifetime of presigned upload URLs in seconds (overrides APPSTORE_UPLOAD_URL_TTL_SECS)
    #[arg(long)]
    pub upload_url_ttl_secs: Option<u64>,

    /// Extracted file layout: `flat` or `versioned` (overrides APPSTORE_STORAGE_LAYOUT)
    #[arg(long)]
    pub storage_layout: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI arguments over values looked up by `lookup`, then defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_host = lookup("APPSTORE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "APPSTORE_PORT", 3000u16)?;
        let env_storage =
            lookup("APPSTORE_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = lookup("APPSTORE_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/appstore.db".into());
        let env_ttl = parse_var(&lookup, "APPSTORE_UPLOAD_URL_TTL_SECS", 15 * 60u64)?;
        let env_layout = lookup("APPSTORE_STORAGE_LAYOUT").unwrap_or_else(|| "flat".into());

        let port = args.port.unwrap_or(env_port);
        let public_base_url = args
            .public_base_url
            .or_else(|| lookup("APPSTORE_PUBLIC_BASE_URL"))
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", port));

        let signing_secret = lookup("APPSTORE_SIGNING_SECRET").unwrap_or_default();
        if signing_secret.is_empty() {
            tracing::warn!("APPSTORE_SIGNING_SECRET is not set; upload URLs cannot be issued");
        }

        let upload_url_ttl_secs = args.upload_url_ttl_secs.unwrap_or(env_ttl);
        if upload_url_ttl_secs == 0 {
            bail!("upload URL lifetime must be at least one second");
        }

        let layout_raw = args.storage_layout.unwrap_or(env_layout);
        let storage_layout = StorageLayout::from_str(&layout_raw)
            .map_err(|err| anyhow::anyhow!(err))
            .with_context(|| format!("parsing storage layout `{}`", layout_raw))?;

        let max_package_bytes =
            parse_var(&lookup, "APPSTORE_MAX_PACKAGE_BYTES", MAX_TOTAL_BYTES)?;
        if max_package_bytes == 0 {
            bail!("APPSTORE_MAX_PACKAGE_BYTES must be greater than zero");
        }

        let defaults = QueueSettings::default();
        let queue = QueueSettings {
            poll_interval: Duration::from_millis(parse_var(
                &lookup,
                "APPSTORE_QUEUE_POLL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            visibility_timeout: Duration::from_secs(parse_var(
                &lookup,
                "APPSTORE_QUEUE_VISIBILITY_SECS",
                defaults.visibility_timeout.as_secs(),
            )?),
            max_receive_count: parse_var(
                &lookup,
                "APPSTORE_QUEUE_MAX_RECEIVES",
                defaults.max_receive_count,
            )?,
            batch_size: defaults.batch_size,
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signing_secret,
            upload_url_ttl: Duration::from_secs(upload_url_ttl_secs),
            uploads_bucket: lookup("APPSTORE_UPLOADS_BUCKET").unwrap_or_else(|| "uploads".into()),
            apps_bucket: lookup("APPSTORE_APPS_BUCKET").unwrap_or_else(|| "apps".into()),
            storage_layout,
            max_package_bytes,
            queue,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = AppConfig::resolve(Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.upload_url_ttl, Duration::from_secs(900));
        assert_eq!(cfg.storage_layout, StorageLayout::Flat);
        assert_eq!(cfg.public_base_url, "http://127.0.0.1:3000");
        assert_eq!(cfg.uploads_bucket, "uploads");
        assert_eq!(cfg.apps_bucket, "apps");
        assert_eq!(cfg.max_package_bytes, MAX_TOTAL_BYTES);
        assert_eq!(cfg.queue.max_receive_count, 5);
    }

    #[test]
    fn args_override_environment() {
        let args = Args {
            port: Some(8080),
            upload_url_ttl_secs: Some(60),
            storage_layout: Some("versioned".into()),
            ..Args::default()
        };
        let cfg = AppConfig::resolve(
            args,
            env_of(&[
                ("APPSTORE_PORT", "9000"),
                ("APPSTORE_UPLOAD_URL_TTL_SECS", "120"),
                ("APPSTORE_PUBLIC_BASE_URL", "https://apps.example.com/"),
                ("APPSTORE_SIGNING_SECRET", "s3cret"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.upload_url_ttl, Duration::from_secs(60));
        assert_eq!(cfg.storage_layout, StorageLayout::Versioned);
        assert_eq!(cfg.public_base_url, "https://apps.example.com");
        assert_eq!(cfg.signing_secret, "s3cret");

        let cfg =
            AppConfig::resolve(Args::default(), env_of(&[("APPSTORE_MAX_PACKAGE_BYTES", "1024")]))
                .unwrap();
        assert_eq!(cfg.max_package_bytes, 1024);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(AppConfig::resolve(Args::default(), env_of(&[("APPSTORE_PORT", "http")])).is_err());
        assert!(
            AppConfig::resolve(Args::default(), env_of(&[("APPSTORE_STORAGE_LAYOUT", "nested")]))
                .is_err()
        );
        let zero_ttl = Args {
            upload_url_ttl_secs: Some(0),
            ..Args::default()
        };
        assert!(AppConfig::resolve(zero_ttl, env_of(&[])).is_err());
        assert!(
            AppConfig::resolve(Args::default(), env_of(&[("APPSTORE_MAX_PACKAGE_BYTES", "0")]))
                .is_err()
        );
    }
}
