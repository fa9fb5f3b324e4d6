//! Store configuration, resolved once at startup.
//!
//! Every option is read from the environment (optionally seeded from a `.env`
//! file). Nothing in the crate reads the environment after `load()` returns;
//! the resulting [`StoreConfig`] is passed to the crypto module and the token
//! service at construction.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::token::EmptyPermissionPolicy;

pub const DEFAULT_GIST_API: &str = "https://api.github.com";
pub const DEFAULT_GIST_FILE: &str = "tokens.json.enc";
pub const DEFAULT_OBJECT_KEY: &str = "tokenstore/tokens.json.enc";
pub const DEFAULT_FILE_PATH: &str = ".tokenstore/tokens.json.enc";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 5;
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 10;

/// Environment variables set by serverless platforms whose local filesystem
/// does not survive a cold start.
const SERVERLESS_MARKERS: &[(&str, &str)] = &[
    ("AWS_LAMBDA_FUNCTION_NAME", "aws-lambda"),
    ("VERCEL", "vercel"),
    ("NETLIFY", "netlify"),
    ("K_SERVICE", "cloud-run"),
    ("FUNCTIONS_WORKER_RUNTIME", "azure-functions"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("{0}")]
    Insecure(String),
}

/// Where the Remote-Object Backend keeps the collection.
#[derive(Clone)]
pub enum RemoteConfig {
    /// Gist-style document API: one named file inside one document.
    Gist {
        api_base: String,
        token: String,
        gist_id: String,
        file_name: String,
    },
    /// Named blob in an object store (`s3://`, `gs://`, `az://`, `http(s)://`,
    /// `file://`, `memory://`).
    ObjectStore { url: String, key: String },
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteConfig::Gist {
                api_base,
                gist_id,
                file_name,
                ..
            } => f
                .debug_struct("Gist")
                .field("api_base", api_base)
                .field("token", &"**redacted**")
                .field("gist_id", gist_id)
                .field("file_name", file_name)
                .finish(),
            RemoteConfig::ObjectStore { url, key } => f
                .debug_struct("ObjectStore")
                .field("url", url)
                .field("key", key)
                .finish(),
        }
    }
}

#[derive(Clone)]
pub struct StoreConfig {
    /// Operator-supplied key seed. `None` falls back to a weak derived key.
    pub encryption_key: Option<String>,
    pub remote: Option<RemoteConfig>,
    /// Explicit local file path. When set, the filesystem is trusted to be
    /// persistent even on a detected serverless platform.
    pub file_path: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub cache_ttl: Duration,
    pub backend_timeout: Duration,
    pub empty_permissions: EmptyPermissionPolicy,
    pub invalidation_marker: Option<PathBuf>,
    pub memory_fallback: bool,
    /// Name of the detected serverless platform, if any.
    pub serverless_platform: Option<String>,
    pub production: bool,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "**redacted**"),
            )
            .field("remote", &self.remote)
            .field("file_path", &self.file_path)
            .field("scratch_dir", &self.scratch_dir)
            .field("cache_ttl", &self.cache_ttl)
            .field("backend_timeout", &self.backend_timeout)
            .field("empty_permissions", &self.empty_permissions)
            .field("invalidation_marker", &self.invalidation_marker)
            .field("memory_fallback", &self.memory_fallback)
            .field("serverless_platform", &self.serverless_platform)
            .field("production", &self.production)
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            remote: None,
            file_path: None,
            scratch_dir: default_scratch_dir(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            backend_timeout: Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS),
            empty_permissions: EmptyPermissionPolicy::default(),
            invalidation_marker: None,
            memory_fallback: true,
            serverless_platform: None,
            production: false,
        }
    }
}

impl StoreConfig {
    /// Build a config from an arbitrary variable lookup. `load()` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let production = get("TOKENSTORE_ENV")
            .or_else(|| get("RUST_ENV"))
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let encryption_key = get("TOKENSTORE_ENCRYPTION_KEY");
        if encryption_key.is_none() && production {
            return Err(ConfigError::Insecure(
                "TOKENSTORE_ENCRYPTION_KEY is not set. Refusing to use the derived default key in production."
                    .into(),
            ));
        }

        let remote = match (get("TOKENSTORE_GIST_TOKEN"), get("TOKENSTORE_GIST_ID")) {
            (Some(token), Some(gist_id)) => Some(RemoteConfig::Gist {
                api_base: get("TOKENSTORE_GIST_API")
                    .unwrap_or_else(|| DEFAULT_GIST_API.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                token,
                gist_id,
                file_name: get("TOKENSTORE_GIST_FILE")
                    .unwrap_or_else(|| DEFAULT_GIST_FILE.to_string()),
            }),
            _ => get("TOKENSTORE_OBJECT_URL").map(|url| RemoteConfig::ObjectStore {
                url,
                key: get("TOKENSTORE_OBJECT_KEY").unwrap_or_else(|| DEFAULT_OBJECT_KEY.to_string()),
            }),
        };

        let empty_permissions = match get("TOKENSTORE_EMPTY_PERMISSIONS") {
            Some(v) => v.parse().map_err(|e: String| {
                ConfigError::InvalidValue("TOKENSTORE_EMPTY_PERMISSIONS".into(), e)
            })?,
            None => EmptyPermissionPolicy::default(),
        };

        let memory_fallback = match get("TOKENSTORE_MEMORY_FALLBACK") {
            Some(v) => parse_bool(&v).ok_or_else(|| {
                ConfigError::InvalidValue("TOKENSTORE_MEMORY_FALLBACK".into(), v.clone())
            })?,
            None => true,
        };

        let serverless_platform = SERVERLESS_MARKERS
            .iter()
            .find(|marker| get(marker.0).is_some())
            .map(|marker| marker.1.to_string());

        Ok(StoreConfig {
            encryption_key,
            remote,
            file_path: get("TOKENSTORE_FILE_PATH").map(PathBuf::from),
            scratch_dir: get("TOKENSTORE_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_scratch_dir),
            cache_ttl: Duration::from_secs(parse_secs(
                &get,
                "TOKENSTORE_CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL_SECS,
            )?),
            backend_timeout: Duration::from_secs(parse_nonzero_secs(
                &get,
                "TOKENSTORE_BACKEND_TIMEOUT_SECS",
                DEFAULT_BACKEND_TIMEOUT_SECS,
            )?),
            empty_permissions,
            invalidation_marker: get("TOKENSTORE_INVALIDATION_MARKER").map(PathBuf::from),
            memory_fallback,
            serverless_platform,
            production,
        })
    }

    /// The path the Local-File Backend uses when no override is configured.
    pub fn local_file_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FILE_PATH))
    }
}

pub fn load() -> Result<StoreConfig, ConfigError> {
    dotenvy::dotenv().ok();
    let config = StoreConfig::from_lookup(|name| std::env::var(name).ok())?;
    if config.encryption_key.is_none() {
        tracing::warn!(
            "TOKENSTORE_ENCRYPTION_KEY is not set; using the derived default key. Set a key for production."
        );
    }
    Ok(config)
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("tokenstore")
}

fn parse_secs<G>(get: &G, name: &str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(v) => v
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

/// A zero backend timeout would fail every call that is not ready on its
/// first poll.
fn parse_nonzero_secs<G>(get: &G, name: &str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match parse_secs(get, name, default)? {
        0 => Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be at least 1 second".to_string(),
        )),
        secs => Ok(secs),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<StoreConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StoreConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_any_variables() {
        let cfg = config_from(&[]).unwrap();
        assert!(cfg.encryption_key.is_none());
        assert!(cfg.remote.is_none());
        assert!(cfg.file_path.is_none());
        assert_eq!(cfg.cache_ttl, Duration::from_secs(5));
        assert_eq!(cfg.backend_timeout, Duration::from_secs(10));
        assert_eq!(cfg.empty_permissions, EmptyPermissionPolicy::AllowAll);
        assert!(cfg.memory_fallback);
        assert!(!cfg.production);
        assert_eq!(cfg.local_file_path(), PathBuf::from(DEFAULT_FILE_PATH));
    }

    #[test]
    fn test_gist_credentials_take_precedence_over_object_url() {
        let cfg = config_from(&[
            ("TOKENSTORE_GIST_TOKEN", "ghp_abc"),
            ("TOKENSTORE_GIST_ID", "deadbeef"),
            ("TOKENSTORE_GIST_API", "http://localhost:9999/"),
            ("TOKENSTORE_OBJECT_URL", "memory://"),
        ])
        .unwrap();
        match cfg.remote {
            Some(RemoteConfig::Gist {
                api_base,
                gist_id,
                file_name,
                ..
            }) => {
                assert_eq!(api_base, "http://localhost:9999");
                assert_eq!(gist_id, "deadbeef");
                assert_eq!(file_name, DEFAULT_GIST_FILE);
            }
            other => panic!("expected gist remote, got {:?}", other),
        }
    }

    #[test]
    fn test_gist_token_without_id_is_not_a_remote() {
        let cfg = config_from(&[("TOKENSTORE_GIST_TOKEN", "ghp_abc")]).unwrap();
        assert!(cfg.remote.is_none());
    }

    #[test]
    fn test_object_url_remote() {
        let cfg = config_from(&[("TOKENSTORE_OBJECT_URL", "s3://bucket?region=eu-west-1")]).unwrap();
        match cfg.remote {
            Some(RemoteConfig::ObjectStore { url, key }) => {
                assert_eq!(url, "s3://bucket?region=eu-west-1");
                assert_eq!(key, DEFAULT_OBJECT_KEY);
            }
            other => panic!("expected object store remote, got {:?}", other),
        }
    }

    #[test]
    fn test_production_requires_encryption_key() {
        let err = config_from(&[("TOKENSTORE_ENV", "production")]).unwrap_err();
        assert!(matches!(err, ConfigError::Insecure(_)));

        let ok = config_from(&[
            ("RUST_ENV", "production"),
            ("TOKENSTORE_ENCRYPTION_KEY", "operator-secret"),
        ])
        .unwrap();
        assert!(ok.production);
    }

    #[test]
    fn test_invalid_numbers_and_flags_are_rejected() {
        assert!(config_from(&[("TOKENSTORE_CACHE_TTL_SECS", "soon")]).is_err());
        assert!(matches!(
            config_from(&[("TOKENSTORE_BACKEND_TIMEOUT_SECS", "0")]),
            Err(ConfigError::InvalidValue(ref name, _)) if name == "TOKENSTORE_BACKEND_TIMEOUT_SECS"
        ));
        assert!(config_from(&[("TOKENSTORE_MEMORY_FALLBACK", "maybe")]).is_err());
        assert!(config_from(&[("TOKENSTORE_EMPTY_PERMISSIONS", "sometimes")]).is_err());
    }

    #[test]
    fn test_overrides_and_serverless_marker() {
        let cfg = config_from(&[
            ("TOKENSTORE_CACHE_TTL_SECS", "0"),
            ("TOKENSTORE_EMPTY_PERMISSIONS", "deny"),
            ("TOKENSTORE_MEMORY_FALLBACK", "off"),
            ("TOKENSTORE_FILE_PATH", "/var/lib/tokens.enc"),
            ("VERCEL", "1"),
        ])
        .unwrap();
        assert_eq!(cfg.cache_ttl, Duration::ZERO);
        assert_eq!(cfg.empty_permissions, EmptyPermissionPolicy::DenyAll);
        assert!(!cfg.memory_fallback);
        assert_eq!(cfg.local_file_path(), PathBuf::from("/var/lib/tokens.enc"));
        assert_eq!(cfg.serverless_platform.as_deref(), Some("vercel"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cfg = config_from(&[
            ("TOKENSTORE_ENCRYPTION_KEY", "super-secret-seed"),
            ("TOKENSTORE_GIST_TOKEN", "ghp_secret_token"),
            ("TOKENSTORE_GIST_ID", "abc"),
        ])
        .unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("super-secret-seed"));
        assert!(!rendered.contains("ghp_secret_token"));
    }
}
