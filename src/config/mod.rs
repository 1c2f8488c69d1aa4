use crate::error::ConfigError;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How the reconciliation sweep reacts to an unreadable staging entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkErrorPolicy {
    /// Stop the sweep at the first walk error; the next sweep starts over.
    #[default]
    Abort,
    /// Count the error and keep walking.
    Skip,
}

/// Tunables of the staging-to-S3 pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Upload queue capacity (default: 10,000)
    pub queue_capacity: usize,

    /// Time between reconciliation sweeps (default: 30 minutes)
    pub reconcile_interval: Duration,

    /// Minimum age before a staged file is reconciled (default: 10 minutes)
    pub stale_after: Duration,

    /// Upper bound on a single remote put (default: 5 minutes)
    pub upload_timeout: Duration,

    pub walk_errors: WalkErrorPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            reconcile_interval: Duration::from_secs(30 * 60),
            stale_after: Duration::from_secs(10 * 60),
            upload_timeout: Duration::from_secs(5 * 60),
            walk_errors: WalkErrorPolicy::Abort,
        }
    }
}

/// Login accepted by the protocol driver
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and how staged files are written remotely
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    /// Key prefix, without a trailing slash
    pub prefix: String,
    pub region: String,
    /// S3-compatible endpoint (MinIO etc.); enables path-style addressing
    pub endpoint_url: Option<String>,
    /// Static access key pair; the default credential chain is used otherwise
    pub static_keys: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub cache_dir: PathBuf,
    pub s3: S3Settings,
    pub credentials: Credentials,
    /// Port the protocol engine listens on (default: 2121)
    pub port: u16,
    pub pipeline: PipelineSettings,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let required = |name: &'static str, hint: &'static str| {
            var(name).ok_or(ConfigError::Missing { var: name, hint })
        };

        let cache_dir = required("FTP2S3_CACHE_DIR", "the local staging directory")?;
        let bucket = required("FTP2S3_BUCKET", "the S3 bucket uploads are stored in")?;
        let prefix = required(
            "FTP2S3_PREFIX",
            "the prefix you want to store in on S3",
        )?;
        let trimmed = prefix.trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(ConfigError::Invalid {
                var: "FTP2S3_PREFIX",
                value: prefix,
                reason: "must name at least one key segment".to_string(),
            });
        }
        let username = required("FTP2S3_USERNAME", "the FTP login user")?;
        let password = required("FTP2S3_PASSWORD", "the FTP login password")?;

        let region = var("FTP2S3_REGION").unwrap_or_else(|| "us-east-1".to_string());
        let port = parse_or(&var, "FTP2S3_PORT", 2121u16)?;

        let static_keys = match (var("FTP2S3_ACCESS_KEY"), var("FTP2S3_SECRET_KEY")) {
            (Some(access), Some(secret)) => Some((access, secret)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Missing {
                    var: "FTP2S3_SECRET_KEY",
                    hint: "required together with FTP2S3_ACCESS_KEY",
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::Missing {
                    var: "FTP2S3_ACCESS_KEY",
                    hint: "required together with FTP2S3_SECRET_KEY",
                });
            }
        };

        let default = PipelineSettings::default();
        let pipeline = PipelineSettings {
            queue_capacity: positive(
                "FTP2S3_QUEUE_CAPACITY",
                parse_or(&var, "FTP2S3_QUEUE_CAPACITY", default.queue_capacity)?,
            )?,
            reconcile_interval: Duration::from_secs(positive(
                "FTP2S3_RECONCILE_INTERVAL_SECS",
                parse_or(
                    &var,
                    "FTP2S3_RECONCILE_INTERVAL_SECS",
                    default.reconcile_interval.as_secs(),
                )?,
            )?),
            stale_after: Duration::from_secs(parse_or(
                &var,
                "FTP2S3_STALE_AFTER_SECS",
                default.stale_after.as_secs(),
            )?),
            upload_timeout: Duration::from_secs(positive(
                "FTP2S3_UPLOAD_TIMEOUT_SECS",
                parse_or(
                    &var,
                    "FTP2S3_UPLOAD_TIMEOUT_SECS",
                    default.upload_timeout.as_secs(),
                )?,
            )?),
            walk_errors: if parse_or(&var, "FTP2S3_SKIP_WALK_ERRORS", false)? {
                WalkErrorPolicy::Skip
            } else {
                WalkErrorPolicy::Abort
            },
        };

        Ok(Self {
            cache_dir: PathBuf::from(cache_dir),
            s3: S3Settings {
                bucket,
                prefix: trimmed,
                region,
                endpoint_url: var("FTP2S3_ENDPOINT"),
                static_keys,
            },
            credentials: Credentials { username, password },
            port,
            pipeline,
        })
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                var: name,
                reason: e.to_string(),
                value,
            })
        }
    }
}

fn positive<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + fmt::Display,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            var: name,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        })
    }
}
