use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::error::LoadTestError;
use crate::loadtest::LoadTestConfig;

const DEFAULT_API_URL: &str = "https://datastore.googleapis.com";

/// Load test for the get-timeline read path
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct LoadTestArgs {
    /// Number of distinct simulated users
    #[arg(long, default_value = "50", allow_negative_numbers = true)]
    pub concurrent_users: i64,

    /// Number of sequential requests per user
    #[arg(long, default_value = "1", allow_negative_numbers = true)]
    pub requests_per_user: i64,

    /// Prefix of the simulated user names
    #[arg(long, default_value = "user")]
    pub user_prefix: String,

    /// Maximum number of posts per timeline
    #[arg(long, default_value = "20")]
    pub limit: usize,

    /// CSV file the per-iteration summary rows are appended to
    #[arg(long, default_value = "conc.csv")]
    pub output: String,
}

/// Iterations per invocation; not configurable from the command line
pub const ITERATIONS: usize = 3;

impl LoadTestArgs {
    /// Validate the counts and build the driver configuration
    pub fn into_config(self) -> std::result::Result<LoadTestConfig, LoadTestError> {
        if self.concurrent_users <= 0 || self.requests_per_user <= 0 {
            return Err(LoadTestError::InvalidInput(
                "concurrent-users and requests-per-user must be > 0".to_string(),
            ));
        }

        Ok(LoadTestConfig {
            concurrent_users: self.concurrent_users as usize,
            requests_per_user: self.requests_per_user as usize,
            user_prefix: self.user_prefix,
            limit: self.limit,
            output: expand_tilde(&self.output),
            iterations: ITERATIONS,
            ..Default::default()
        })
    }
}

/// Connection settings for the Datastore REST API
#[derive(Clone, Debug, PartialEq)]
pub struct DatastoreSettings {
    pub project_id: String,
    pub namespace: Option<String>,

    /// API root; `http://<DATASTORE_EMULATOR_HOST>` when the emulator is used
    pub base_url: String,

    /// Bearer token; `None` against the emulator
    pub access_token: Option<String>,

    // HTTP client
    pub max_connections: usize,
    pub connect_timeout: u64,
    pub request_timeout: u64,
    pub max_retries: u32,
}

impl DatastoreSettings {
    /// Load settings from the environment (after reading `.env` if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(|name| std::env::var(name).ok())
    }

    /// Build settings from a variable lookup. Priority for the project id:
    /// DATASTORE_PROJECT_ID > GOOGLE_CLOUD_PROJECT.
    pub fn from_source<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get_nonempty = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        let project_id = get_nonempty("DATASTORE_PROJECT_ID")
            .or_else(|| get_nonempty("GOOGLE_CLOUD_PROJECT"))
            .context("DATASTORE_PROJECT_ID is required (or set GOOGLE_CLOUD_PROJECT)")?;

        let (base_url, access_token) = match get_nonempty("DATASTORE_EMULATOR_HOST") {
            Some(host) => (emulator_url(&host), None),
            None => (
                get_nonempty("DATASTORE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                get_nonempty("DATASTORE_ACCESS_TOKEN"),
            ),
        };

        let settings = DatastoreSettings {
            project_id,
            namespace: get_nonempty("DATASTORE_NAMESPACE"),
            base_url,
            access_token,
            max_connections: parse_or(&get, "HTTP_MAX_CONNECTIONS", 100),
            connect_timeout: parse_or(&get, "HTTP_CONNECT_TIMEOUT", 30),
            request_timeout: parse_or(&get, "HTTP_REQUEST_TIMEOUT", 60),
            max_retries: parse_or(&get, "HTTP_MAX_RETRIES", 3),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Whether requests go to the local emulator
    pub fn is_emulator(&self) -> bool {
        self.access_token.is_none() && self.base_url.starts_with("http://")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.access_token.is_none() && !self.base_url.starts_with("http://") {
            anyhow::bail!(
                "DATASTORE_ACCESS_TOKEN is required unless DATASTORE_EMULATOR_HOST is set \
                 (e.g. export DATASTORE_ACCESS_TOKEN=$(gcloud auth print-access-token))"
            );
        }
        Ok(())
    }
}

/// Log level from LOG_LEVEL, defaulting to `info`
pub fn log_level() -> String {
    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

fn parse_or<F, T>(get: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    get(name).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

/// `localhost:8081` → `http://localhost:8081`
fn emulator_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_end_matches('/'))
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
