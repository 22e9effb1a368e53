use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;
use vaulter_backup::config::{DecryptorConfig, RequestConfig};
use zeroize::Zeroizing;

const DEFAULT_RETRY_LIMIT: u64 = 3;

/// The configuration file of the tool.
///
/// ```json
/// {
///     "homeserver": "https://matrix.example.org",
///     "access_token": "syt_...",
///     "database_path": "/var/lib/vaulter/events.sqlite3",
///     "max_concurrent_fetches": 8,
///     "request_timeout_secs": 30,
///     "retry_limit": 3
/// }
/// ```
#[derive(Deserialize)]
pub struct VaulterConfig {
    /// The homeserver hosting the key backup.
    pub homeserver: Url,
    /// The access token used to talk to the homeserver.
    pub access_token: String,
    /// The recovery key of the backup, if it isn't passed on the command
    /// line.
    #[serde(default)]
    pub recovery_key: Option<Zeroizing<String>>,
    /// Where the SQLite event store lives.
    pub database_path: PathBuf,
    /// How many room keys may be fetched from the backup at once.
    #[serde(default)]
    pub max_concurrent_fetches: Option<NonZeroUsize>,
    /// How long a single request to the homeserver may take.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// How often a failed request to the homeserver is retried.
    #[serde(default)]
    pub retry_limit: Option<u64>,
}

impl VaulterConfig {
    /// Read the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Couldn't read the config file {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Couldn't parse the config file {}", path.display()))
    }

    /// Take the recovery key to use, the one given on the command line wins
    /// over the one in the config file.
    ///
    /// The copy held by the config is erased, the returned key is erased when
    /// it is dropped.
    pub fn take_recovery_key(
        &mut self,
        cli_recovery_key: Option<String>,
    ) -> Result<Zeroizing<String>> {
        let from_config = self.recovery_key.take();

        match cli_recovery_key {
            Some(recovery_key) => Ok(Zeroizing::new(recovery_key)),
            None => from_config.context(
                "No recovery key given, pass --recovery-key, set VAULTER_RECOVERY_KEY or add it \
                 to the config file",
            ),
        }
    }

    /// How the requests to the homeserver are sent, shared by the HTTP client
    /// and the decryptor.
    pub fn request_config(&self) -> RequestConfig {
        let config =
            RequestConfig::new().retry_limit(self.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT));

        match self.request_timeout_secs {
            Some(secs) => config.timeout(Duration::from_secs(secs)),
            None => config,
        }
    }

    pub fn decryptor_config(&self) -> DecryptorConfig {
        let config = DecryptorConfig::new().request_config(self.request_config());

        match self.max_concurrent_fetches {
            Some(max) => config.max_concurrent_fetches(max),
            None => config,
        }
    }
}

// The access token and the recovery key are left out.
impl std::fmt::Debug for VaulterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaulterConfig")
            .field("homeserver", &self.homeserver.as_str())
            .field("database_path", &self.database_path)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry_limit", &self.retry_limit)
            .finish_non_exhaustive()
    }
}
