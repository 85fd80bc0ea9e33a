use serde::Deserialize;

/// Default ceiling for the per-chain scan lock, in seconds.
pub const DEFAULT_SCAN_LOCK_TTL_SECS: u64 = 600;

/// A chain slug paired with the base URL of its availability service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScannerEndpoint {
    pub slug: String,
    pub base_url: String,
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Deployment environment name; `local` disables the scan lock
    pub app_env: String,

    /// Name recorded on every scan run started by this process.
    /// The OS hostname unless `HOSTNAME` overrides it.
    pub hostname: String,

    /// Seconds between dispatcher ticks (default: 300)
    pub scan_interval_secs: u64,

    /// Maximum number of chain scans running at once (default: 4)
    pub scan_max_workers: usize,

    /// Per-chain lock ceiling in seconds (default: 600)
    pub scan_lock_ttl_secs: u64,

    /// Availability service per chain, from `SCANNER_ENDPOINTS=slug=url,...`
    pub scanner_endpoints: Vec<ScannerEndpoint>,

    /// Twilio account SID for SMS delivery
    pub twilio_account_sid: Option<String>,

    /// Twilio auth token for SMS delivery
    pub twilio_auth_token: Option<String>,

    /// Sender phone number for SMS delivery
    pub twilio_from_number: Option<String>,

    /// Link included in every notification for changing preferences
    pub preferences_url: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            app_env: std::env::var("APP_ENV").unwrap_or_else(|_| "production".to_string()),
            hostname: resolve_hostname(std::env::var("HOSTNAME").ok()),
            scan_interval_secs: std::env::var("SCAN_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SCAN_INTERVAL_SECS must be a valid u64"))?,
            scan_max_workers: std::env::var("SCAN_MAX_WORKERS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SCAN_MAX_WORKERS must be a valid usize"))?,
            scan_lock_ttl_secs: std::env::var("SCAN_LOCK_TTL_SECS")
                .unwrap_or_else(|_| DEFAULT_SCAN_LOCK_TTL_SECS.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SCAN_LOCK_TTL_SECS must be a valid u64"))?,
            scanner_endpoints: parse_scanner_endpoints(
                &std::env::var("SCANNER_ENDPOINTS").unwrap_or_default(),
            )?,
            twilio_account_sid: std::env::var("TWILIO_ACCOUNT_SID").ok(),
            twilio_auth_token: std::env::var("TWILIO_AUTH_TOKEN").ok(),
            twilio_from_number: std::env::var("TWILIO_FROM_NUMBER").ok(),
            preferences_url: std::env::var("PREFERENCES_URL")
                .unwrap_or_else(|_| "https://curb.run".to_string()),
        })
    }

    /// Whether this process runs in the local development environment.
    pub fn is_local(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("local")
    }
}

/// A non-blank override wins; otherwise ask the OS.
pub fn resolve_hostname(override_name: Option<String>) -> String {
    if let Some(name) = override_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        return name;
    }

    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(err) => {
            tracing::warn!(error = %err, "Could not read the machine hostname");
            "unknown".to_string()
        }
    }
}

/// Parse `slug=url` pairs separated by commas. Blank entries are ignored.
pub fn parse_scanner_endpoints(raw: &str) -> anyhow::Result<Vec<ScannerEndpoint>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (slug, base_url) = entry.split_once('=').ok_or_else(|| {
                anyhow::anyhow!("SCANNER_ENDPOINTS entry '{}' must look like slug=url", entry)
            })?;
            let slug = slug.trim();
            let base_url = base_url.trim().trim_end_matches('/');
            if slug.is_empty() || base_url.is_empty() {
                anyhow::bail!("SCANNER_ENDPOINTS entry '{}' has an empty slug or url", entry);
            }
            Ok(ScannerEndpoint {
                slug: slug.to_string(),
                base_url: base_url.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scanner_endpoints() {
        let endpoints =
            parse_scanner_endpoints("giant=https://giant.example/api/, weis = http://weis:8080")
                .unwrap();
        assert_eq!(
            endpoints,
            vec![
                ScannerEndpoint {
                    slug: "giant".to_string(),
                    base_url: "https://giant.example/api".to_string(),
                },
                ScannerEndpoint {
                    slug: "weis".to_string(),
                    base_url: "http://weis:8080".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_hostname_defaults_to_machine_name() {
        let machine = hostname::get().unwrap().to_string_lossy().into_owned();
        assert_eq!(resolve_hostname(None), machine);
        assert_eq!(resolve_hostname(Some("  ".to_string())), machine);
        assert_ne!(resolve_hostname(None), "unknown");
    }

    #[test]
    fn test_from_env_records_machine_hostname() {
        // SAFETY: this is the only test in the crate touching the environment.
        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://localhost/curbside_test");
            std::env::remove_var("HOSTNAME");
        }

        let config = AppConfig::from_env().unwrap();
        let machine = hostname::get().unwrap().to_string_lossy().into_owned();
        assert_eq!(config.hostname, machine);
    }

    #[test]
    fn test_hostname_override() {
        assert_eq!(resolve_hostname(Some("worker-7".to_string())), "worker-7");
    }

    #[test]
    fn test_parse_scanner_endpoints_empty() {
        assert!(parse_scanner_endpoints("").unwrap().is_empty());
        assert!(parse_scanner_endpoints(" , ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_scanner_endpoints_rejects_malformed() {
        assert!(parse_scanner_endpoints("giant").is_err());
        assert!(parse_scanner_endpoints("=http://x").is_err());
    }
}
