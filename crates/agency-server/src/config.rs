use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use agency_common::{PolicyName, RatePolicy};

use crate::rate_limit::DEFAULT_CLEANUP_INTERVAL;

/// Longest admin session accepted from `AGENCY_SESSION_TTL_HOURS` (one year).
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

/// Server configuration, loaded from environment variables.
///
/// Rate limits are given per endpoint class as `<max_requests>/<window_ms>`:
/// - `AGENCY_RATE_LIMIT_CONTACT` (default `3/60000`)
/// - `AGENCY_RATE_LIMIT_UPLOAD` (default `10/60000`)
/// - `AGENCY_RATE_LIMIT_API` (default `30/60000`)
/// - `AGENCY_RATE_LIMIT_AUTH` (default `5/900000`)
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Allowed CORS origins (comma-separated). If empty, defaults to restrictive.
    pub cors_origins: Vec<String>,
    pub rate_policies: HashMap<PolicyName, RatePolicy>,
    pub cleanup_interval: Duration,
    pub admin_username: String,
    /// Argon2 PHC string. Without one, every login attempt is rejected.
    pub admin_password_hash: Option<String>,
    pub session_ttl: chrono::Duration,
    pub upload_dir: PathBuf,
    pub upload_max_bytes: usize,
    pub contact_webhook_url: Option<String>,
}

impl ServerConfig {
    pub fn load() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host: IpAddr = var("AGENCY_HOST")
            .unwrap_or_else(|| "0.0.0.0".to_string())
            .parse()
            .map_err(|_| "AGENCY_HOST must be a valid IP address".to_string())?;

        let port: u16 = var("AGENCY_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .map_err(|_| "AGENCY_PORT must be a valid port number".to_string())?;

        let cors_origins: Vec<String> = var("AGENCY_CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mut rate_policies = HashMap::new();
        for name in PolicyName::ALL {
            let key = format!("AGENCY_RATE_LIMIT_{}", name.as_str().to_ascii_uppercase());
            let policy = match var(&key) {
                Some(raw) => RatePolicy::parse(&raw).map_err(|e| format!("{key}: {e}"))?,
                None => name.default_policy(),
            };
            rate_policies.insert(name, policy);
        }

        let cleanup_interval = match var("AGENCY_RATE_LIMIT_CLEANUP_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .map_err(|_| "AGENCY_RATE_LIMIT_CLEANUP_SECS must be a number".to_string())?;
                if secs == 0 {
                    return Err("AGENCY_RATE_LIMIT_CLEANUP_SECS must be greater than 0".to_string());
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_CLEANUP_INTERVAL,
        };

        let admin_username = var("AGENCY_ADMIN_USERNAME").unwrap_or_else(|| "admin".to_string());
        let admin_password_hash = var("AGENCY_ADMIN_PASSWORD_HASH");

        let session_ttl_hours: i64 = var("AGENCY_SESSION_TTL_HOURS")
            .unwrap_or_else(|| "24".to_string())
            .parse()
            .map_err(|_| "AGENCY_SESSION_TTL_HOURS must be a number".to_string())?;
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&session_ttl_hours) {
            return Err(format!(
                "AGENCY_SESSION_TTL_HOURS must be between 1 and {MAX_SESSION_TTL_HOURS}"
            ));
        }
        let session_ttl = chrono::Duration::try_hours(session_ttl_hours)
            .ok_or_else(|| "AGENCY_SESSION_TTL_HOURS is out of range".to_string())?;

        let upload_dir =
            PathBuf::from(var("AGENCY_UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string()));

        let upload_max_bytes: usize = var("AGENCY_UPLOAD_MAX_BYTES")
            .unwrap_or_else(|| (5 * 1024 * 1024).to_string())
            .parse()
            .map_err(|_| "AGENCY_UPLOAD_MAX_BYTES must be a number".to_string())?;

        let contact_webhook_url = var("AGENCY_CONTACT_WEBHOOK_URL");

        Ok(Self {
            host,
            port,
            cors_origins,
            rate_policies,
            cleanup_interval,
            admin_username,
            admin_password_hash,
            session_ttl,
            upload_dir,
            upload_max_bytes,
            contact_webhook_url,
        })
    }

    pub fn rate_policy(&self, name: PolicyName) -> RatePolicy {
        self.rate_policies
            .get(&name)
            .copied()
            .unwrap_or_else(|| name.default_policy())
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cors_origins", &self.cors_origins)
            .field("rate_policies", &self.rate_policies)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("admin_username", &self.admin_username)
            .field(
                "admin_password_hash",
                &self.admin_password_hash.as_ref().map(|_| "<redacted>"),
            )
            .field("session_ttl", &self.session_ttl)
            .field("upload_dir", &self.upload_dir)
            .field("upload_max_bytes", &self.upload_max_bytes)
            .field("contact_webhook_url", &self.contact_webhook_url)
            .finish()
    }
}
