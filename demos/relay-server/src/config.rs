//! Server configuration read from the environment.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result, bail};
use relay_core::RelayConfig;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3456;

/// File consulted for the token when `RELAY_TOKEN` is unset.
pub const TOKEN_FILE: &str = ".relay-token";

/// Everything the server needs at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub token: String,
    pub public_dir: PathBuf,
    pub relay: RelayConfig,
}

impl ServerConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// Returns error if no token is configured or a numeric variable
    /// does not parse.
    pub fn from_env(working_dir: &Path) -> Result<Self> {
        Self::from_lookup(working_dir, |key| std::env::var(key).ok())
    }

    fn from_lookup(working_dir: &Path, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let token = match var("RELAY_TOKEN").filter(|t| !t.trim().is_empty()) {
            Some(token) => token.trim().to_owned(),
            None => read_token_file(&working_dir.join(TOKEN_FILE))?,
        };

        let mut relay = RelayConfig::default();
        if let Some(v) = parse_var(&var, "RELAY_HISTORY_CAPACITY")? {
            relay.history_capacity = v;
        }
        if let Some(v) = parse_var(&var, "RELAY_SESSION_EXPIRY_SECS")? {
            relay.session_expiry_secs = v;
        }
        if let Some(v) = parse_var(&var, "RELAY_QUESTION_TIMEOUT_SECS")? {
            relay.question_timeout_secs = v;
        }

        Ok(Self {
            port: parse_var(&var, "RELAY_PORT")?.unwrap_or(DEFAULT_PORT),
            token,
            public_dir: var("RELAY_PUBLIC_DIR")
                .map_or_else(|| working_dir.join("public"), PathBuf::from),
            relay,
        })
    }

    /// Address to bind.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid {key}: {raw:?}"))
        })
        .transpose()
}

fn read_token_file(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!(
            "No auth token set. Set RELAY_TOKEN or create {}",
            path.display()
        );
    }
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .trim()
        .to_owned();
    if token.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(token)
}
