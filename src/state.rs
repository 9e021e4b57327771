use std::env;
use std::str::FromStr;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::cache::Cache;
use crate::codec::OltModel;
use crate::pool::{ConnectionPool, DEFAULT_MAX_SESSIONS};
use crate::snmp::{SnmpTarget, UdpConnector};
use crate::telnet::{TelnetClient, TelnetConfig};

/// Application configuration from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind_address: String,
    pub olt_model: OltModel,
    pub olt_host: String,
    pub snmp_port: u16,
    pub snmp_community: String,
    /// Per-request SNMP timeout.
    pub snmp_timeout: Duration,
    pub telnet: TelnetConfig,
    /// Upper bound on concurrently open SNMP sessions.
    pub pool_max: usize,
    pub cache_ttl: Duration,
    /// Deadline for a whole HTTP request, slot wait included.
    pub request_timeout: Duration,
    /// Cron expression for the cache purge job.
    pub cache_purge_cron: String,
}

/// Parses `name`, falling back to `default` when unset or malformed.
fn parsed_or<T, F>(lookup: &F, name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!(variable = name, value = %raw, error = %e, "invalid value, using default");
            default
        }),
    }
}

fn text_or<F>(lookup: &F, name: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Creates Config from environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let olt_host = text_or(&lookup, "OLT_HOST", "127.0.0.1");
        let telnet_defaults = TelnetConfig::default();
        let telnet = TelnetConfig {
            host: olt_host.clone(),
            port: parsed_or(&lookup, "TELNET_PORT", telnet_defaults.port),
            username: text_or(&lookup, "TELNET_USERNAME", &telnet_defaults.username),
            password: text_or(&lookup, "TELNET_PASSWORD", &telnet_defaults.password),
            enable_password: text_or(
                &lookup,
                "TELNET_ENABLE_PASSWORD",
                &telnet_defaults.enable_password,
            ),
            hostname: text_or(&lookup, "TELNET_HOSTNAME", &telnet_defaults.hostname),
        };

        Self {
            bind_address: text_or(&lookup, "BIND_ADDRESS", "0.0.0.0:8081"),
            olt_model: parsed_or(&lookup, "OLT_MODEL", OltModel::C320),
            olt_host,
            snmp_port: parsed_or(&lookup, "SNMP_PORT", 161),
            snmp_community: text_or(&lookup, "SNMP_COMMUNITY", "public"),
            snmp_timeout: Duration::from_secs(parsed_or(&lookup, "SNMP_TIMEOUT_SECS", 3)),
            telnet,
            pool_max: parsed_or(&lookup, "POOL_MAX", DEFAULT_MAX_SESSIONS).max(1),
            cache_ttl: Duration::from_secs(parsed_or(&lookup, "CACHE_TTL_SECS", 60)),
            request_timeout: Duration::from_secs(parsed_or(&lookup, "REQUEST_TIMEOUT_SECS", 30)),
            cache_purge_cron: text_or(&lookup, "CACHE_PURGE_CRON", "0 * * * * *"),
        }
    }

    pub fn snmp_target(&self) -> SnmpTarget {
        SnmpTarget {
            host: self.olt_host.clone(),
            port: self.snmp_port,
            community: self.snmp_community.clone(),
            timeout: self.snmp_timeout,
        }
    }
}

/// Shared application state passed to all request handlers.
///
/// Generic over the SNMP connector so the routes can run against an
/// in-memory device.
#[derive(Debug)]
pub struct AppState<C = UdpConnector> {
    pub config: Config,
    pub connector: C,
    pub target: SnmpTarget,
    pub pool: ConnectionPool,
    pub cache: Cache,
    /// The one interactive shell, opened on first use.
    pub telnet: Mutex<Option<TelnetClient>>,
}

impl<C> AppState<C> {
    pub fn new(config: Config, connector: C) -> Self {
        Self {
            target: config.snmp_target(),
            pool: ConnectionPool::new(config.olt_model, config.pool_max),
            cache: Cache::new(config.cache_ttl),
            telnet: Mutex::new(None),
            connector,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.bind_address, "0.0.0.0:8081");
        assert_eq!(config.olt_model, OltModel::C320);
        assert_eq!(config.snmp_port, 161);
        assert_eq!(config.snmp_timeout, Duration::from_secs(3));
        assert_eq!(config.pool_max, 100);
        assert_eq!(config.telnet, TelnetConfig::default());
        assert_eq!(config.cache_purge_cron, "0 * * * * *");
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = config_from(&[
            ("OLT_HOST", "10.20.0.5"),
            ("OLT_MODEL", "c300"),
            ("SNMP_PORT", "not-a-port"),
            ("POOL_MAX", "8"),
            ("CACHE_TTL_SECS", "-1"),
            ("TELNET_HOSTNAME", "OLT-JKT"),
        ]);
        assert_eq!(config.olt_model, OltModel::C300);
        assert_eq!(config.snmp_port, 161);
        assert_eq!(config.pool_max, 8);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.telnet.host, "10.20.0.5");
        assert_eq!(config.telnet.hostname, "OLT-JKT");

        let target = config.snmp_target();
        assert_eq!(target.host, "10.20.0.5");
        assert_eq!(target.community, "public");
    }

    #[test]
    fn test_unknown_model_falls_back() {
        assert_eq!(config_from(&[("OLT_MODEL", "MA5800")]).olt_model, OltModel::C320);
    }
}
