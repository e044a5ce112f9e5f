//! Service configuration from environment variables.
//!
//! | Variable                | Default        |
//! |-------------------------|----------------|
//! | `BIND_ADDR`             | `0.0.0.0:4444` |
//! | `MAX_CONNECTIONS`       | `1000`         |
//! | `PROVE_TIMEOUT_SECS`    | `120`          |
//! | `SUBMIT_TIMEOUT_SECS`   | `30`           |
//! | `SEQUENCER_QUEUE_DEPTH` | `64`           |
//! | `SEQUENCER_START_NONCE` | `0`            |
//! | `SUBMITTER_SECRET_KEY`  | random         |
//! | `LEDGER_URL`            | in-process     |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use thiserror::Error;

use crate::network::ServerConfig;
use crate::session::SequencerConfig;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Value could not be parsed.
    #[error("{var}: cannot parse {value:?}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },

    /// Secret key is not 32 bytes of hex.
    #[error("SUBMITTER_SECRET_KEY must be 64 hex characters")]
    BadSecretKey,
}

/// Full service configuration.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Connection limit.
    pub max_connections: usize,
    /// Time allowed per proof.
    pub prove_timeout: Duration,
    /// Time allowed per ledger submission.
    pub submit_timeout: Duration,
    /// Sequencer queue depth.
    pub queue_depth: usize,
    /// First nonce to assign.
    pub start_nonce: u64,
    /// Submitter ed25519 secret key.
    pub submitter_key: Option<[u8; 32]>,
    /// Ledger gateway; `None` runs the in-process ledger.
    pub ledger_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: ServerConfig::default().bind_addr,
            max_connections: ServerConfig::default().max_connections,
            prove_timeout: Duration::from_secs(120),
            submit_timeout: Duration::from_secs(30),
            queue_depth: 64,
            start_nonce: 0,
            submitter_key: None,
            ledger_url: None,
        }
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("prove_timeout", &self.prove_timeout)
            .field("submit_timeout", &self.submit_timeout)
            .field("queue_depth", &self.queue_depth)
            .field("start_nonce", &self.start_nonce)
            .field("submitter_key", &self.submitter_key.map(|_| "<set>"))
            .field("ledger_url", &self.ledger_url)
            .finish()
    }
}

fn parse<T: FromStr>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { var, value }),
    }
}

impl ServiceConfig {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let submitter_key = match lookup("SUBMITTER_SECRET_KEY") {
            None => None,
            Some(raw) => {
                let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
                    .map_err(|_| ConfigError::BadSecretKey)?;
                Some(<[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| ConfigError::BadSecretKey)?)
            }
        };

        Ok(Self {
            bind_addr: parse("BIND_ADDR", lookup("BIND_ADDR"), defaults.bind_addr)?,
            max_connections: parse("MAX_CONNECTIONS", lookup("MAX_CONNECTIONS"), defaults.max_connections)?,
            prove_timeout: Duration::from_secs(parse(
                "PROVE_TIMEOUT_SECS",
                lookup("PROVE_TIMEOUT_SECS"),
                defaults.prove_timeout.as_secs(),
            )?),
            submit_timeout: Duration::from_secs(parse(
                "SUBMIT_TIMEOUT_SECS",
                lookup("SUBMIT_TIMEOUT_SECS"),
                defaults.submit_timeout.as_secs(),
            )?),
            queue_depth: parse("SEQUENCER_QUEUE_DEPTH", lookup("SEQUENCER_QUEUE_DEPTH"), defaults.queue_depth)?,
            start_nonce: parse("SEQUENCER_START_NONCE", lookup("SEQUENCER_START_NONCE"), defaults.start_nonce)?,
            submitter_key,
            ledger_url: lookup("LEDGER_URL").filter(|url| !url.trim().is_empty()),
        })
    }

    /// Server settings.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind_addr,
            max_connections: self.max_connections,
            ..ServerConfig::default()
        }
    }

    /// Sequencer settings.
    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            queue_depth: self.queue_depth,
            submit_timeout: self.submit_timeout,
            start_nonce: self.start_nonce,
        }
    }

    /// Submitter key; random when none is configured.
    pub fn signing_key(&self) -> SigningKey {
        let secret = self.submitter_key.unwrap_or_else(rand::random);
        SigningKey::from_bytes(&secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), 4444);
        assert_eq!(config.prove_timeout, Duration::from_secs(120));
        assert_eq!(config.submit_timeout, Duration::from_secs(30));
        assert_eq!(config.queue_depth, 64);
        assert_eq!(config.start_nonce, 0);
        assert!(config.ledger_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("SEQUENCER_START_NONCE", "41"),
            ("SUBMITTER_SECRET_KEY", "11".repeat(32).as_str()),
            ("LEDGER_URL", "http://ledger:8080"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.sequencer_config().start_nonce, 41);
        assert_eq!(config.signing_key().to_bytes(), [0x11; 32]);
        assert_eq!(config.ledger_url.as_deref(), Some("http://ledger:8080"));
    }

    #[test]
    fn test_invalid_values() {
        let err = ServiceConfig::from_lookup(lookup(&[("MAX_CONNECTIONS", "lots")])).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { var: "MAX_CONNECTIONS", value: "lots".into() });

        let err = ServiceConfig::from_lookup(lookup(&[("SUBMITTER_SECRET_KEY", "abcd")])).unwrap_err();
        assert_eq!(err, ConfigError::BadSecretKey);
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = ServiceConfig::from_lookup(lookup(&[("SUBMITTER_SECRET_KEY", "ab".repeat(32).as_str())])).unwrap();
        assert!(!format!("{:?}", config).contains(&"ab".repeat(32)));
    }
}
