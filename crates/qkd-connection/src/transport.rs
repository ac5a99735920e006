// Path: crates/qkd-connection/src/transport.rs
//! Byte-stream transports underlying the four endpoints (§4.4). Each pipe
//! endpoint is void, standard input/output, or a local/TCP stream; peer and
//! listen endpoints are the same transports minus stdin/stdout.
//!
//! `timeout_ms` follows §4.4: `>0` waits up to that many milliseconds,
//! `0` is non-blocking (fails immediately if no data is ready), `-1` is
//! infinite (bounded only by module interruption, which the caller enforces
//! by not calling back in).

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::Duration;

use qkd_api::error::TransportError;

/// A blocking, timeout-aware duplex byte stream.
pub trait Transport: Send {
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout_ms: i64) -> Result<(), TransportError>;
    fn write_all_timeout(&mut self, buf: &[u8], timeout_ms: i64) -> Result<(), TransportError>;
}

fn io_err(e: std::io::Error) -> TransportError {
    if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) {
        TransportError::Timeout(0)
    } else if matches!(e.kind(), std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset) {
        TransportError::Closed
    } else {
        TransportError::Io(e.to_string())
    }
}

/// No-op transport: every operation fails immediately. Used when an
/// endpoint URL is empty (disabled).
#[derive(Debug, Default)]
pub struct VoidTransport;

impl Transport for VoidTransport {
    fn read_exact_timeout(&mut self, _buf: &mut [u8], _timeout_ms: i64) -> Result<(), TransportError> {
        Err(TransportError::NotReady("endpoint is void".to_string()))
    }

    fn write_all_timeout(&mut self, _buf: &[u8], _timeout_ms: i64) -> Result<(), TransportError> {
        Err(TransportError::NotReady("endpoint is void".to_string()))
    }
}

/// Standard input, read-only: used for `pipe_in`.
pub struct StdinTransport {
    stdin: std::io::Stdin,
}

impl StdinTransport {
    pub fn new() -> Self {
        Self { stdin: std::io::stdin() }
    }
}

impl Default for StdinTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for StdinTransport {
    fn read_exact_timeout(&mut self, buf: &mut [u8], _timeout_ms: i64) -> Result<(), TransportError> {
        self.stdin.lock().read_exact(buf).map_err(io_err)
    }

    fn write_all_timeout(&mut self, _buf: &[u8], _timeout_ms: i64) -> Result<(), TransportError> {
        Err(TransportError::NotReady("stdin:// is read-only".to_string()))
    }
}

/// Standard output, write-only: used for `pipe_out`.
pub struct StdoutTransport {
    stdout: std::io::Stdout,
}

impl StdoutTransport {
    pub fn new() -> Self {
        Self { stdout: std::io::stdout() }
    }
}

impl Default for StdoutTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for StdoutTransport {
    fn read_exact_timeout(&mut self, _buf: &mut [u8], _timeout_ms: i64) -> Result<(), TransportError> {
        Err(TransportError::NotReady("stdout:// is write-only".to_string()))
    }

    fn write_all_timeout(&mut self, buf: &[u8], _timeout_ms: i64) -> Result<(), TransportError> {
        self.stdout.lock().write_all(buf).map_err(io_err)
    }
}

/// Applies the `timeout_ms` convention to a socket's read/write deadline:
/// `-1` clears it (infinite wait), `0` uses the shortest deadline the OS
/// will accept (effectively non-blocking), `>0` is a millisecond deadline.
fn apply_timeout(set_timeout: impl Fn(Option<Duration>) -> std::io::Result<()>, timeout_ms: i64) -> Result<(), TransportError> {
    let duration = match timeout_ms {
        -1 => None,
        0 => Some(Duration::from_nanos(1)),
        ms => Some(Duration::from_millis(ms as u64)),
    };
    set_timeout(duration).map_err(io_err)
}

/// A UNIX-domain stream, used for `ipc://` peer/listen endpoints.
pub struct LocalTransport {
    stream: UnixStream,
}

impl LocalTransport {
    pub fn connect(path: &Path) -> Result<Self, TransportError> {
        let stream = UnixStream::connect(path).map_err(io_err)?;
        Ok(Self { stream })
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub fn listen(path: &Path) -> Result<UnixListener, TransportError> {
        let _ = std::fs::remove_file(path);
        UnixListener::bind(path).map_err(io_err)
    }
}

impl Transport for LocalTransport {
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout_ms: i64) -> Result<(), TransportError> {
        apply_timeout(|d| self.stream.set_read_timeout(d), timeout_ms)?;
        self.stream.read_exact(buf).map_err(io_err)
    }

    fn write_all_timeout(&mut self, buf: &[u8], timeout_ms: i64) -> Result<(), TransportError> {
        apply_timeout(|d| self.stream.set_write_timeout(d), timeout_ms)?;
        self.stream.write_all(buf).map_err(io_err)
    }
}

/// A TCP stream, used for `tcp://` peer/listen endpoints.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port)).map_err(io_err)?;
        stream.set_nodelay(true).map_err(io_err)?;
        Ok(Self { stream })
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn listen(host: &str, port: u16) -> Result<TcpListener, TransportError> {
        TcpListener::bind((host, port)).map_err(io_err)
    }
}

impl Transport for TcpTransport {
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout_ms: i64) -> Result<(), TransportError> {
        apply_timeout(|d| self.stream.set_read_timeout(d), timeout_ms)?;
        self.stream.read_exact(buf).map_err(io_err)
    }

    fn write_all_timeout(&mut self, buf: &[u8], timeout_ms: i64) -> Result<(), TransportError> {
        apply_timeout(|d| self.stream.set_write_timeout(d), timeout_ms)?;
        self.stream.write_all(buf).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn void_transport_rejects_everything() {
        let mut t = VoidTransport;
        assert!(t.read_exact_timeout(&mut [0u8; 1], -1).is_err());
        assert!(t.write_all_timeout(&[0u8], -1).is_err());
    }

    #[test]
    fn tcp_round_trip_over_loopback() {
        let listener = TcpTransport::listen("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut server_side = TcpTransport::from_stream(stream);
            let mut buf = [0u8; 5];
            server_side.read_exact_timeout(&mut buf, -1).unwrap();
            server_side.write_all_timeout(&buf, -1).unwrap();
        });
        let mut client = TcpTransport::connect("127.0.0.1", addr.port()).unwrap();
        client.write_all_timeout(b"hello", -1).unwrap();
        let mut reply = [0u8; 5];
        client.read_exact_timeout(&mut reply, -1).unwrap();
        assert_eq!(&reply, b"hello");
        server.join().unwrap();
    }

    #[test]
    fn local_round_trip_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = LocalTransport::listen(&path).unwrap();
        let path_clone = path.clone();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut server_side = LocalTransport::from_stream(stream);
            let mut buf = [0u8; 3];
            server_side.read_exact_timeout(&mut buf, -1).unwrap();
            server_side.write_all_timeout(&buf, -1).unwrap();
            let _ = path_clone;
        });
        let mut client = LocalTransport::connect(&path).unwrap();
        client.write_all_timeout(b"hi!", -1).unwrap();
        let mut reply = [0u8; 3];
        client.read_exact_timeout(&mut reply, -1).unwrap();
        assert_eq!(&reply, b"hi!");
        server.join().unwrap();
    }
}
