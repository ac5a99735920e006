// Path: crates/qkd-connection/src/url.rs
//! The pipe/peer endpoint URL grammar (§6): `stdin://`/`stdout://` (pipe
//! only), `ipc://<path>` (UNIX-domain), `tcp://<host>:<port>` (IP). A
//! `tcp://*` form is tolerated for listen (rewritten to `0.0.0.0`) but
//! rejected for peer. IPC paths with no filename are auto-generated under
//! the process temp directory from `(module_id, pid)`.

use std::path::PathBuf;

use qkd_api::error::ConfigError;

/// Which of the four endpoints a URL is being parsed for. `Stdin`/`Stdout`
/// are only valid for pipe endpoints; `tcp://*` is only valid for listen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    PipeIn,
    PipeOut,
    Listen,
    Peer,
}

impl EndpointKind {
    fn allows_stdio(self) -> bool {
        matches!(self, Self::PipeIn | Self::PipeOut)
    }

    fn allows_wildcard_tcp(self) -> bool {
        matches!(self, Self::Listen)
    }
}

/// A parsed endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointUrl {
    Void,
    Stdin,
    Stdout,
    Ipc(PathBuf),
    Tcp { host: String, port: u16 },
}

impl EndpointUrl {
    /// Parses `raw` for the given endpoint kind. `module_id` and the
    /// process id seed the auto-generated IPC path when `ipc://` carries no
    /// filename.
    pub fn parse(raw: &str, kind: EndpointKind, module_id: &str) -> Result<Self, ConfigError> {
        if raw.is_empty() {
            return Ok(Self::Void);
        }
        if raw == "stdin://" {
            if !kind.allows_stdio() {
                return Err(ConfigError::Invalid {
                    key: "url".to_string(),
                    reason: "stdin:// is only valid for a pipe-in endpoint".to_string(),
                });
            }
            return Ok(Self::Stdin);
        }
        if raw == "stdout://" {
            if !kind.allows_stdio() {
                return Err(ConfigError::Invalid {
                    key: "url".to_string(),
                    reason: "stdout:// is only valid for a pipe-out endpoint".to_string(),
                });
            }
            return Ok(Self::Stdout);
        }
        if let Some(path) = raw.strip_prefix("ipc://") {
            if path.is_empty() {
                let generated = std::env::temp_dir().join(format!("qkd-{module_id}-{}.sock", std::process::id()));
                return Ok(Self::Ipc(generated));
            }
            return Ok(Self::Ipc(PathBuf::from(path)));
        }
        if let Some(hostport) = raw.strip_prefix("tcp://") {
            let (host, port_str) = hostport
                .rsplit_once(':')
                .ok_or_else(|| ConfigError::Invalid { key: "url".to_string(), reason: format!("missing port in {raw}") })?;
            if host == "*" {
                if !kind.allows_wildcard_tcp() {
                    return Err(ConfigError::Invalid {
                        key: "url".to_string(),
                        reason: "tcp://* is only valid for a listen endpoint".to_string(),
                    });
                }
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| ConfigError::MalformedNumber { key: "url".to_string(), value: port_str.to_string() })?;
                return Ok(Self::Tcp { host: "0.0.0.0".to_string(), port });
            }
            let port: u16 = port_str
                .parse()
                .map_err(|_| ConfigError::MalformedNumber { key: "url".to_string(), value: port_str.to_string() })?;
            return Ok(Self::Tcp { host: host.to_string(), port });
        }
        Err(ConfigError::UnknownScheme(raw.to_string()))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_url_is_void() {
        assert_eq!(EndpointUrl::parse("", EndpointKind::Peer, "m1").unwrap(), EndpointUrl::Void);
    }

    #[test]
    fn stdin_rejected_for_peer() {
        assert!(EndpointUrl::parse("stdin://", EndpointKind::Peer, "m1").is_err());
        assert!(EndpointUrl::parse("stdin://", EndpointKind::PipeIn, "m1").is_ok());
    }

    #[test]
    fn tcp_wildcard_only_for_listen() {
        assert!(EndpointUrl::parse("tcp://*:7000", EndpointKind::Peer, "m1").is_err());
        let parsed = EndpointUrl::parse("tcp://*:7000", EndpointKind::Listen, "m1").unwrap();
        assert_eq!(parsed, EndpointUrl::Tcp { host: "0.0.0.0".to_string(), port: 7000 });
    }

    #[test]
    fn tcp_host_port_parses() {
        let parsed = EndpointUrl::parse("tcp://10.0.0.1:9", EndpointKind::Peer, "m1").unwrap();
        assert_eq!(parsed, EndpointUrl::Tcp { host: "10.0.0.1".to_string(), port: 9 });
    }

    #[test]
    fn ipc_with_no_path_is_auto_generated() {
        let parsed = EndpointUrl::parse("ipc://", EndpointKind::Listen, "sift-1").unwrap();
        match parsed {
            EndpointUrl::Ipc(path) => {
                assert!(path.to_string_lossy().contains("sift-1"));
            }
            _ => panic!("expected Ipc"),
        }
    }

    #[test]
    fn ipc_with_path_is_preserved() {
        let parsed = EndpointUrl::parse("ipc:///tmp/foo.sock", EndpointKind::Peer, "m1").unwrap();
        assert_eq!(parsed, EndpointUrl::Ipc(PathBuf::from("/tmp/foo.sock")));
    }

    #[test]
    fn unknown_scheme_rejected() {
        assert!(EndpointUrl::parse("ftp://host", EndpointKind::Peer, "m1").is_err());
    }
}
