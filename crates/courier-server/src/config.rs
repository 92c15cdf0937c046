use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use courier_gateway::badge::DEFAULT_POLL_INTERVAL;

const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub badge_poll: Duration,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("COURIER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!(
                "COURIER_JWT_SECRET is unset or still a placeholder. \
                 It must match the identity provider's signing secret."
            );
        }

        let db_path: PathBuf = lookup("COURIER_DB_PATH")
            .unwrap_or_else(|| "courier.db".into())
            .into();
        let host = lookup("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("COURIER_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("COURIER_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("COURIER_HOST must be an IP address")?;

        let badge_poll = lookup("COURIER_BADGE_POLL_SECS")
            .and_then(|v| v.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            badge_poll,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_around_a_real_secret() {
        let config = load(&[("COURIER_JWT_SECRET", "a-long-random-value")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("courier.db"));
        assert_eq!(config.addr.port(), 3000);
        assert_eq!(config.badge_poll, Duration::from_secs(30));
    }

    #[test]
    fn placeholder_or_missing_secrets_refuse_to_start() {
        assert!(load(&[]).is_err());
        assert!(load(&[("COURIER_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_honored() {
        let config = load(&[
            ("COURIER_JWT_SECRET", "x9"),
            ("COURIER_HOST", "127.0.0.1"),
            ("COURIER_PORT", "8081"),
            ("COURIER_BADGE_POLL_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(config.addr.to_string(), "127.0.0.1:8081");
        assert_eq!(config.badge_poll, Duration::from_secs(5));

        assert!(load(&[("COURIER_JWT_SECRET", "x9"), ("COURIER_PORT", "http")]).is_err());
    }
}
