// Path: crates/qkd-sifting-bb84/src/config.rs
//! Module-specific configuration for BB84 sifting, resolved from the same
//! flat option map [`qkd_module::RuntimeConfig`] reads (§4.6: "module-specific
//! options are handled by the module itself").

use std::collections::BTreeMap;

use qkd_api::error::ConfigError;
use qkd_api::role::Role;

use crate::keyid::KeyIdCounter;

/// BB84-specific options resolved for one role.
#[derive(Debug, Clone)]
pub struct Bb84Config {
    /// Target size, in bytes, of each emitted sifted key (§4.7).
    pub raw_key_length: usize,
    /// Whether the QAuth basis-exchange authenticator is active (§4.8).
    pub qauth_enabled: bool,
    /// QAuth modulus `m`; default 16, must be ≥ 1.
    pub qauth_modulus: u32,
    /// The `"<shift>/<add>"` key id pattern (§4.7).
    pub key_id_pattern: KeyIdCounter,
}

fn get<'a>(options: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    options.get(key).map(String::as_str)
}

impl Bb84Config {
    pub fn resolve(options: &BTreeMap<String, String>, pfx: &str, _role: Role) -> Result<Self, ConfigError> {
        let shared_key = |suffix: &str| format!("{pfx}.{suffix}");

        let raw_key_length = match get(options, &shared_key("raw_key_length")) {
            Some(v) => v.parse().map_err(|_| ConfigError::MalformedNumber {
                key: shared_key("raw_key_length"),
                value: v.to_string(),
            })?,
            None => 1024usize,
        };

        let qauth_key = shared_key("qauth");
        let qauth_enabled = match get(options, &qauth_key) {
            Some("true") | Some("1") | Some("yes") => true,
            Some("false") | Some("0") | Some("no") | None => false,
            Some(other) => {
                return Err(ConfigError::MalformedNumber { key: qauth_key, value: other.to_string() })
            }
        };

        let modulus_key = shared_key("qauth_modulus");
        let qauth_modulus: u32 = match get(options, &modulus_key) {
            Some(v) => {
                let m: u32 = v
                    .parse()
                    .map_err(|_| ConfigError::MalformedNumber { key: modulus_key.clone(), value: v.to_string() })?;
                if m == 0 {
                    return Err(ConfigError::Invalid {
                        key: modulus_key,
                        reason: "qauth_modulus must be >= 1".to_string(),
                    });
                }
                m
            }
            None => 16,
        };

        let pattern_key = shared_key("key_id_pattern");
        let key_id_pattern = KeyIdCounter::parse(get(options, &pattern_key).unwrap_or(""), &pattern_key)?;

        if raw_key_length == 0 {
            return Err(ConfigError::Invalid {
                key: shared_key("raw_key_length"),
                reason: "raw_key_length must be >= 1".to_string(),
            });
        }

        Ok(Self { raw_key_length, qauth_enabled, qauth_modulus, key_id_pattern })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_match_spec() {
        let cfg = Bb84Config::resolve(&opts(&[]), "module.1", Role::Initiator).unwrap();
        assert_eq!(cfg.raw_key_length, 1024);
        assert!(!cfg.qauth_enabled);
        assert_eq!(cfg.qauth_modulus, 16);
        assert_eq!(cfg.key_id_pattern, KeyIdCounter::new(0, 0));
    }

    #[test]
    fn overrides_are_applied() {
        let options = opts(&[
            ("module.1.raw_key_length", "1"),
            ("module.1.qauth", "true"),
            ("module.1.qauth_modulus", "4"),
            ("module.1.key_id_pattern", "8/100"),
        ]);
        let cfg = Bb84Config::resolve(&options, "module.1", Role::Initiator).unwrap();
        assert_eq!(cfg.raw_key_length, 1);
        assert!(cfg.qauth_enabled);
        assert_eq!(cfg.qauth_modulus, 4);
        assert_eq!(cfg.key_id_pattern, KeyIdCounter::new(8, 100));
    }

    #[test]
    fn zero_modulus_is_rejected() {
        let options = opts(&[("module.1.qauth_modulus", "0")]);
        assert!(Bb84Config::resolve(&options, "module.1", Role::Initiator).is_err());
    }

    #[test]
    fn zero_raw_key_length_is_rejected() {
        let options = opts(&[("module.1.raw_key_length", "0")]);
        assert!(Bb84Config::resolve(&options, "module.1", Role::Initiator).is_err());
    }
}
