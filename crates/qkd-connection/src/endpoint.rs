// Path: crates/qkd-connection/src/endpoint.rs
//! Builds a concrete [`Transport`] from a parsed [`EndpointUrl`] (§4.4).
//! Listening endpoints additionally need to accept one connection before a
//! [`Channel`] can be built; [`Listener`] wraps that.

use qkd_api::error::TransportError;

use crate::channel::Channel;
use crate::transport::{LocalTransport, StdinTransport, StdoutTransport, TcpTransport, Transport, VoidTransport};
use crate::url::EndpointUrl;

/// Connects out to a peer/pipe endpoint and wraps it in a [`Channel`].
pub fn connect(url: &EndpointUrl) -> Result<Channel, TransportError> {
    let transport: Box<dyn Transport> = match url {
        EndpointUrl::Void => Box::new(VoidTransport),
        EndpointUrl::Stdin => Box::new(StdinTransport::new()),
        EndpointUrl::Stdout => Box::new(StdoutTransport::new()),
        EndpointUrl::Ipc(path) => Box::new(LocalTransport::connect(path)?),
        EndpointUrl::Tcp { host, port } => Box::new(TcpTransport::connect(host, *port)?),
    };
    Ok(Channel::new(transport))
}

/// A bound listen endpoint, accepting one peer connection at a time.
pub enum Listener {
    Void,
    Local(std::os::unix::net::UnixListener),
    Tcp(std::net::TcpListener),
}

impl Listener {
    pub fn bind(url: &EndpointUrl) -> Result<Self, TransportError> {
        match url {
            EndpointUrl::Void => Ok(Self::Void),
            EndpointUrl::Stdin | EndpointUrl::Stdout => Err(TransportError::NotReady(
                "stdin/stdout are not valid listen endpoints".to_string(),
            )),
            EndpointUrl::Ipc(path) => Ok(Self::Local(LocalTransport::listen(path)?)),
            EndpointUrl::Tcp { host, port } => Ok(Self::Tcp(TcpTransport::listen(host, *port)?)),
        }
    }

    /// Blocks until one peer connects and returns a [`Channel`] for it.
    pub fn accept(&self) -> Result<Channel, TransportError> {
        match self {
            Self::Void => Err(TransportError::NotReady("endpoint is void".to_string())),
            Self::Local(listener) => {
                let (stream, _) = listener.accept().map_err(|e| TransportError::Io(e.to_string()))?;
                Ok(Channel::new(Box::new(LocalTransport::from_stream(stream))))
            }
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().map_err(|e| TransportError::Io(e.to_string()))?;
                Ok(Channel::new(Box::new(TcpTransport::from_stream(stream))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::EndpointKind;
    use std::thread;

    #[test]
    fn listener_and_connect_round_trip_over_tcp() {
        let listen_url = EndpointUrl::parse("tcp://127.0.0.1:0", EndpointKind::Listen, "m1").unwrap();
        let listener = Listener::bind(&listen_url).unwrap();
        let bound_port = match &listener {
            Listener::Tcp(l) => l.local_addr().unwrap().port(),
            _ => panic!("expected tcp listener"),
        };

        let server = thread::spawn(move || {
            listener.accept().unwrap();
        });

        let peer_url = EndpointUrl::parse(&format!("tcp://127.0.0.1:{bound_port}"), EndpointKind::Peer, "m1").unwrap();
        let _channel = connect(&peer_url).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn void_listener_rejects_accept() {
        let listener = Listener::bind(&EndpointUrl::Void).unwrap();
        assert!(listener.accept().is_err());
    }
}
