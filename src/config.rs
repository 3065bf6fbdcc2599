use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
    pub rollback_timeout: Duration,
    pub log_json: bool,
    pub otel: OtelConfig,
}

/// Metadata store pool settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/meta/documents.db".into(),
            max_connections: 10,
            min_connections: 1,
            max_lifetime: Duration::from_secs(300),
        }
    }
}

/// Blob storage settings.
#[derive(Clone)]
pub struct StorageConfig {
    pub dir: String,
    pub public_url: String,
    /// `None` means a random per-process secret is generated at startup.
    pub presign_secret: Option<String>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("dir", &self.dir)
            .field("public_url", &self.public_url)
            .field(
                "presign_secret",
                &self.presign_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// OTLP trace export, read from the standard `OTEL_*` variables.
///
/// Export is on only when an endpoint is configured and `OTEL_SDK_DISABLED`
/// is not `true`.
#[derive(Debug, Clone)]
pub struct OtelConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    /// `grpc` or `http/protobuf`.
    pub protocol: String,
    pub service_name: String,
    pub sampler: Option<String>,
    pub sampler_arg: Option<String>,
}

impl OtelConfig {
    fn from_vars(var: &impl Fn(&str) -> Option<String>) -> Self {
        let endpoint = var("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT")
            .or_else(|| var("OTEL_EXPORTER_OTLP_ENDPOINT"))
            .filter(|v| !v.is_empty());
        let disabled = var("OTEL_SDK_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        Self {
            enabled: endpoint.is_some() && !disabled,
            endpoint,
            protocol: var("OTEL_EXPORTER_OTLP_PROTOCOL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "grpc".into()),
            service_name: var("OTEL_SERVICE_NAME")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").into()),
            sampler: var("OTEL_TRACES_SAMPLER").filter(|v| !v.is_empty()),
            sampler_arg: var("OTEL_TRACES_SAMPLER_ARG").filter(|v| !v.is_empty()),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Document management REST API")]
pub struct Args {
    /// Host to bind to (overrides DOCAPI_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DOCAPI_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where document payloads are stored (overrides DOCAPI_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DOCAPI_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL used in presigned links (overrides DOCAPI_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // A missing .env file is fine; real environment variables win.
        let _ = dotenvy::dotenv();
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over variables looked up through `var` over defaults.
    pub fn from_sources(args: Args, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = DatabaseConfig::default();

        let env_host = var("DOCAPI_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&var, "DOCAPI_PORT", 8080u16)?;
        let port = args.port.unwrap_or(env_port);

        let database = DatabaseConfig {
            url: args
                .database_url
                .or_else(|| var("DOCAPI_DATABASE_URL"))
                .unwrap_or(defaults.url),
            max_connections: parse_var(&var, "DOCAPI_DB_MAX_CONNECTIONS", defaults.max_connections)?,
            min_connections: parse_var(&var, "DOCAPI_DB_MIN_CONNECTIONS", defaults.min_connections)?,
            max_lifetime: Duration::from_secs(parse_var(
                &var,
                "DOCAPI_DB_MAX_LIFETIME_SECS",
                defaults.max_lifetime.as_secs(),
            )?),
        };
        if database.max_connections == 0 {
            anyhow::bail!("DOCAPI_DB_MAX_CONNECTIONS must be at least 1");
        }

        let storage = StorageConfig {
            dir: args
                .storage_dir
                .or_else(|| var("DOCAPI_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            public_url: args
                .public_url
                .or_else(|| var("DOCAPI_PUBLIC_URL"))
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            presign_secret: var("DOCAPI_PRESIGN_SECRET").filter(|s| !s.is_empty()),
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port,
            database,
            storage,
            request_timeout: Duration::from_secs(parse_var(
                &var,
                "DOCAPI_REQUEST_TIMEOUT_SECS",
                30u64,
            )?),
            max_upload_bytes: parse_var(&var, "DOCAPI_MAX_UPLOAD_BYTES", 100 * 1024 * 1024usize)?,
            rollback_timeout: Duration::from_secs(parse_var(
                &var,
                "DOCAPI_ROLLBACK_TIMEOUT_SECS",
                10u64,
            )?),
            log_json: var("DOCAPI_LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
            otel: OtelConfig::from_vars(&var),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_env_or_args() {
        let cfg = AppConfig::from_sources(Args::default(), env(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.database.url, "sqlite://./data/meta/documents.db");
        assert_eq!(cfg.database.max_connections, 10);
        assert_eq!(cfg.storage.dir, "./data/objects");
        assert_eq!(cfg.storage.public_url, "http://localhost:8080");
        assert!(cfg.storage.presign_secret.is_none());
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.rollback_timeout, Duration::from_secs(10));
        assert!(!cfg.log_json);
        assert!(!cfg.otel.enabled);
        assert_eq!(cfg.otel.protocol, "grpc");
        assert_eq!(cfg.otel.service_name, "document-api");
    }

    #[test]
    fn cli_overrides_env() {
        let args = Args {
            port: Some(9000),
            storage_dir: Some("/srv/blobs".into()),
            ..Args::default()
        };
        let cfg = AppConfig::from_sources(
            args,
            env(&[
                ("DOCAPI_PORT", "7000"),
                ("DOCAPI_STORAGE_DIR", "/tmp/ignored"),
                ("DOCAPI_HOST", "127.0.0.1"),
                ("DOCAPI_LOG_FORMAT", "JSON"),
                ("DOCAPI_DB_MAX_LIFETIME_SECS", "60"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.storage.dir, "/srv/blobs");
        assert_eq!(cfg.storage.public_url, "http://localhost:9000");
        assert_eq!(cfg.database.max_lifetime, Duration::from_secs(60));
        assert!(cfg.log_json);
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = AppConfig::from_sources(Args::default(), env(&[("DOCAPI_PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("DOCAPI_PORT"));

        let err = AppConfig::from_sources(
            Args::default(),
            env(&[("DOCAPI_DB_MAX_CONNECTIONS", "0")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("DOCAPI_DB_MAX_CONNECTIONS"));
    }

    #[test]
    fn trace_export_needs_an_endpoint_and_honours_the_kill_switch() {
        let cfg = AppConfig::from_sources(
            Args::default(),
            env(&[
                ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
                ("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT", "http://collector:4318/v1/traces"),
                ("OTEL_EXPORTER_OTLP_PROTOCOL", "http/protobuf"),
                ("OTEL_TRACES_SAMPLER", "traceidratio"),
                ("OTEL_TRACES_SAMPLER_ARG", "0.25"),
            ]),
        )
        .unwrap();
        assert!(cfg.otel.enabled);
        assert_eq!(
            cfg.otel.endpoint.as_deref(),
            Some("http://collector:4318/v1/traces")
        );
        assert_eq!(cfg.otel.protocol, "http/protobuf");
        assert_eq!(cfg.otel.sampler.as_deref(), Some("traceidratio"));
        assert_eq!(cfg.otel.sampler_arg.as_deref(), Some("0.25"));

        let cfg = AppConfig::from_sources(
            Args::default(),
            env(&[
                ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
                ("OTEL_SDK_DISABLED", "true"),
            ]),
        )
        .unwrap();
        assert!(!cfg.otel.enabled);
    }

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let cfg = AppConfig::from_sources(
            Args::default(),
            env(&[("DOCAPI_PRESIGN_SECRET", "hunter2")]),
        )
        .unwrap();
        assert_eq!(cfg.storage.presign_secret.as_deref(), Some("hunter2"));
        assert!(!format!("{:?}", cfg).contains("hunter2"));
    }
}
