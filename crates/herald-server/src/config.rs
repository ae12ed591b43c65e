use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

/// How finished messages mark their chats as read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Random,
    Read,
    Unread,
}

impl FromStr for ReceiptMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "read" => Ok(Self::Read),
            "unread" => Ok(Self::Unread),
            other => bail!("unknown read receipt mode '{}' (random, read, unread)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub image_dir: PathBuf,
    pub image_base_url: String,
    pub storage_timeout: Duration,
    pub receipts: ReceiptMode,
    /// Login and password of the account promoted to moderator at startup.
    pub moderator: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("HERALD_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("HERALD_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let host = or("HERALD_HOST", "0.0.0.0");
        let port: u16 = or("HERALD_PORT", "3000")
            .parse()
            .context("HERALD_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("bad bind address {}:{}", host, port))?;

        let timeout_ms: u64 = or("HERALD_STORAGE_TIMEOUT_MS", "5000")
            .parse()
            .context("HERALD_STORAGE_TIMEOUT_MS must be milliseconds")?;
        if timeout_ms == 0 {
            bail!("HERALD_STORAGE_TIMEOUT_MS must be positive");
        }

        let moderator = match (get("HERALD_MODERATOR_LOGIN"), get("HERALD_MODERATOR_PASSWORD")) {
            (Some(login), Some(password)) if !password.is_empty() => Some((login, password)),
            (None, None) => None,
            _ => bail!("HERALD_MODERATOR_LOGIN and HERALD_MODERATOR_PASSWORD go together"),
        };

        Ok(Self {
            addr,
            db_path: or("HERALD_DB_PATH", "herald.db").into(),
            jwt_secret,
            image_dir: or("HERALD_IMAGE_DIR", "./images").into(),
            image_base_url: or("HERALD_IMAGE_BASE_URL", "http://127.0.0.1:3000/images")
                .trim_end_matches('/')
                .to_string(),
            storage_timeout: Duration::from_millis(timeout_ms),
            receipts: or("HERALD_READ_RECEIPTS", "random").parse()?,
            moderator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_a_secret() {
        let cfg = load(&[("HERALD_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(cfg.addr.to_string(), "0.0.0.0:3000");
        assert_eq!(cfg.db_path, PathBuf::from("herald.db"));
        assert_eq!(cfg.image_base_url, "http://127.0.0.1:3000/images");
        assert_eq!(cfg.storage_timeout, Duration::from_secs(5));
        assert_eq!(cfg.receipts, ReceiptMode::Random);
        assert!(cfg.moderator.is_none());
    }

    #[test]
    fn placeholder_or_missing_secret_is_refused() {
        assert!(load(&[]).is_err());
        assert!(load(&[("HERALD_JWT_SECRET", "dev-secret-change-me")]).is_err());
        assert!(load(&[("HERALD_JWT_SECRET", "   ")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = load(&[
            ("HERALD_JWT_SECRET", "s3cr3t-value"),
            ("HERALD_HOST", "127.0.0.1"),
            ("HERALD_PORT", "8080"),
            ("HERALD_IMAGE_BASE_URL", "https://cdn.example/img/"),
            ("HERALD_STORAGE_TIMEOUT_MS", "250"),
            ("HERALD_READ_RECEIPTS", "Unread"),
            ("HERALD_MODERATOR_LOGIN", "root"),
            ("HERALD_MODERATOR_PASSWORD", "hunter2"),
        ])
        .unwrap();
        assert_eq!(cfg.addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.image_base_url, "https://cdn.example/img");
        assert_eq!(cfg.storage_timeout, Duration::from_millis(250));
        assert_eq!(cfg.receipts, ReceiptMode::Unread);
        assert_eq!(cfg.moderator, Some(("root".to_string(), "hunter2".to_string())));
    }

    #[test]
    fn bad_values_abort() {
        let secret = ("HERALD_JWT_SECRET", "s3cr3t-value");
        assert!(load(&[secret, ("HERALD_PORT", "http")]).is_err());
        assert!(load(&[secret, ("HERALD_STORAGE_TIMEOUT_MS", "0")]).is_err());
        assert!(load(&[secret, ("HERALD_READ_RECEIPTS", "sometimes")]).is_err());
        assert!(load(&[secret, ("HERALD_MODERATOR_LOGIN", "root")]).is_err());
    }
}
