// Path: crates/qkd-module/src/config.rs
//! Module configuration (§4.6): a flat option map keyed by
//! `<pfx>.alice.*` / `<pfx>.bob.*` plus pipeline-wide settings. Unknown
//! keys are tolerated with a warning; module-specific keys are left for the
//! module itself to read from the same map.

use std::collections::BTreeMap;
use std::time::Duration;

use qkd_api::error::ConfigError;
use qkd_api::role::Role;

/// The options this runtime recognizes, resolved for one role.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub url_pipe_in: String,
    pub url_pipe_out: String,
    pub url_peer: String,
    pub url_listen: String,
    pub pipeline: String,
    pub random_url: String,
    pub synchronize_keys: bool,
    pub synchronize_ttl: Duration,
    pub timeout_network: i64,
    pub timeout_pipe: i64,
}

fn get<'a>(options: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    options.get(key).map(String::as_str)
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::MalformedNumber { key: key.to_string(), value: other.to_string() }),
    }
}

fn parse_i64(value: &str, key: &str) -> Result<i64, ConfigError> {
    value.parse().map_err(|_| ConfigError::MalformedNumber { key: key.to_string(), value: value.to_string() })
}

impl RuntimeConfig {
    /// Resolves the recognized options for `pfx` (e.g. `module.3.`) and
    /// `role`, logging a warning (via the caller) for any key under `pfx`
    /// this runtime does not recognize.
    pub fn resolve(options: &BTreeMap<String, String>, pfx: &str, role: Role) -> Result<Self, ConfigError> {
        let segment = role.config_segment();
        let role_key = |suffix: &str| format!("{pfx}.{segment}.{suffix}");
        let shared_key = |suffix: &str| format!("{pfx}.{suffix}");

        let url_pipe_in = get(options, &role_key("url_pipe_in")).unwrap_or_default().to_string();
        let url_pipe_out = get(options, &role_key("url_pipe_out")).unwrap_or_default().to_string();
        let url_peer = get(options, &role_key("url_peer")).unwrap_or_default().to_string();
        let url_listen = get(options, &role_key("url_listen")).unwrap_or_default().to_string();

        let pipeline = get(options, &shared_key("pipeline")).unwrap_or_default().to_string();
        let random_url = get(options, &shared_key("random_url")).unwrap_or_default().to_string();

        let sync_key = shared_key("synchronize_keys");
        let synchronize_keys = match get(options, &sync_key) {
            Some(v) => parse_bool(v, &sync_key)?,
            None => false,
        };

        let ttl_key = shared_key("synchronize_ttl");
        let synchronize_ttl = match get(options, &ttl_key) {
            Some(v) => Duration::from_secs_f64(
                v.parse::<f64>().map_err(|_| ConfigError::MalformedNumber { key: ttl_key.clone(), value: v.to_string() })?,
            ),
            None => Duration::from_secs(10),
        };

        let net_key = shared_key("timeout_network");
        let timeout_network = match get(options, &net_key) {
            Some(v) => parse_i64(v, &net_key)?,
            None => -1,
        };

        let pipe_key = shared_key("timeout_pipe");
        let timeout_pipe = match get(options, &pipe_key) {
            Some(v) => parse_i64(v, &pipe_key)?,
            None => -1,
        };

        Ok(Self {
            url_pipe_in,
            url_pipe_out,
            url_peer,
            url_listen,
            pipeline,
            random_url,
            synchronize_keys,
            synchronize_ttl,
            timeout_network,
            timeout_pipe,
        })
    }

    /// Keys under `pfx` this runtime does not recognize (for the
    /// "unknown keys are warned but tolerated" contract). Module-specific
    /// keys are expected here and not a sign of misconfiguration.
    pub fn unrecognized_keys<'a>(options: &'a BTreeMap<String, String>, pfx: &str, role: Role) -> Vec<&'a str> {
        let segment = role.config_segment();
        let recognized: Vec<String> = [
            "url_pipe_in",
            "url_pipe_out",
            "url_peer",
            "url_listen",
            "pipeline",
            "random_url",
            "synchronize_keys",
            "synchronize_ttl",
            "timeout_network",
            "timeout_pipe",
        ]
        .iter()
        .flat_map(|suffix| vec![format!("{pfx}.{segment}.{suffix}"), format!("{pfx}.{suffix}")])
        .collect();

        options
            .keys()
            .filter(|k| k.starts_with(pfx) && !recognized.contains(k))
            .map(String::as_str)
            .collect()
    }
}
