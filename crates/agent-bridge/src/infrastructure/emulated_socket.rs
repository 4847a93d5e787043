//! Emulated Unix socket backend (Cygwin / MSYS `!<socket >` files).
//!
//! Cygwin-style runtimes have no real Unix sockets on Windows.  Instead an
//! agent listens on a loopback TCP port and writes a small descriptor file
//! where the socket would be:
//!
//! ```text
//! !<socket >49152 s 01020304-05060708-090a0b0c-0d0e0f10
//! ```
//!
//! # Handshake
//!
//! ```text
//! bridge                                     agent (127.0.0.1:port)
//!   │── connect ─────────────────────────────────►│
//!   │── cookie (16 bytes, 4 × u32 LE) ───────────►│
//!   │◄──────────────────────────── cookie echo ───│
//!   │── {pid, uid, gid} (12 bytes, 3 × u32 LE) ──►│
//!   │◄──────────────────────── peer credentials ──│
//!   │                                             │
//!   │◄═════════ agent frames, both ways ═════════►│
//! ```
//!
//! After the handshake the TCP stream carries plain agent frames for the rest
//! of the connection.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use agent_bridge_core::protocol::socket_file::MAX_DESCRIPTOR_LEN;
use agent_bridge_core::protocol::{COOKIE_SIZE, CREDENTIALS_SIZE};
use agent_bridge_core::{PeerCredentials, SocketCookie, SocketDescriptor};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::application::backend::{Backend, BackendConnector};
use crate::domain::{BackendKind, BridgeConfig, BridgeError, ConnectionId, RetryPolicy};
use crate::infrastructure::frame_io::{read_frame, write_frame};

/// Win32 `ERROR_SHARING_VIOLATION`: another process holds the file open
/// exclusively, typically while the agent is rewriting it.
const ERROR_SHARING_VIOLATION: i32 = 32;

// ── Connector ─────────────────────────────────────────────────────────────────

/// Opens one handshaken TCP stream per client connection.
#[derive(Debug, Clone)]
pub struct EmulatedSocketConnector {
    descriptor_path: Option<PathBuf>,
    strict_handshake: bool,
    max_frame_size: usize,
    lock_retry: RetryPolicy,
    credentials: PeerCredentials,
}

impl EmulatedSocketConnector {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            descriptor_path: config.socket_descriptor.clone(),
            strict_handshake: config.strict_handshake,
            max_frame_size: config.max_frame_size,
            lock_retry: config.lock_retry,
            credentials: PeerCredentials::for_current_process(),
        }
    }

    /// Overrides the identity record sent in the second handshake step.
    pub fn with_credentials(mut self, credentials: PeerCredentials) -> Self {
        self.credentials = credentials;
        self
    }
}

#[async_trait]
impl BackendConnector for EmulatedSocketConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::EmulatedSocket
    }

    async fn connect(&self, id: ConnectionId) -> Result<Box<dyn Backend>, BridgeError> {
        let path = self.descriptor_path.as_deref().ok_or_else(|| {
            BridgeError::ConfigurationMissing(
                "SSH_AUTH_SOCK is not set; no socket descriptor to connect to".to_string(),
            )
        })?;

        let descriptor = read_descriptor(path, self.lock_retry).await?;
        info!(
            "connection {id}: upstream agent at 127.0.0.1:{} type {}",
            descriptor.port, descriptor.socket_type
        );
        // The cookie is a credential; only trace output carries it.
        trace!("connection {id}: cookie {}", descriptor.cookie);
        if !descriptor.is_stream() {
            warn!(
                "connection {id}: descriptor type `{}` is not a stream socket, trying anyway",
                descriptor.socket_type
            );
        }

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, descriptor.port));
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| BridgeError::backend_io(format!("connect to {addr}"), e))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("connection {id}: TCP_NODELAY not set: {e}");
        }

        let peer = handshake(
            &mut stream,
            &descriptor.cookie,
            &self.credentials,
            self.strict_handshake,
        )
        .await?;
        debug!(
            "connection {id}: peer credentials pid {} uid {} gid {}",
            peer.pid, peer.uid, peer.gid
        );

        Ok(Box::new(EmulatedSocketBackend::new(
            stream,
            self.max_frame_size,
        )))
    }
}

// ── Descriptor file ───────────────────────────────────────────────────────────

/// Opens and parses the descriptor file at `path`.
///
/// # Errors
///
/// - [`BridgeError::BackendUnavailable`] if the file cannot be opened, or is
///   still locked after `retry.attempts` tries.
/// - [`BridgeError::ProtocolMismatch`] if the content is not a valid
///   `!<socket >` descriptor.
pub async fn read_descriptor(path: &Path, retry: RetryPolicy) -> Result<SocketDescriptor, BridgeError> {
    let file = retry_on(retry, is_sharing_violation, || tokio::fs::File::open(path))
        .await
        .map_err(|e| BridgeError::backend_io(format!("open {}", path.display()), e))?;

    let mut content = Vec::with_capacity(MAX_DESCRIPTOR_LEN);
    file.take(MAX_DESCRIPTOR_LEN as u64)
        .read_to_end(&mut content)
        .await
        .map_err(|e| BridgeError::backend_io(format!("read {}", path.display()), e))?;

    Ok(SocketDescriptor::parse(&content)?)
}

/// Runs `op` until it succeeds, fails with an error `is_retryable` rejects,
/// or `policy.attempts` runs out.  Sleeps `policy.delay` between attempts.
pub async fn retry_on<T, F, Fut>(
    policy: RetryPolicy,
    is_retryable: fn(&io::Error) -> bool,
    mut op: F,
) -> io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && attempt < policy.attempts => {
                debug!("attempt {attempt}/{} failed: {e}, retrying", policy.attempts);
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_sharing_violation(err: &io::Error) -> bool {
    err.raw_os_error() == Some(ERROR_SHARING_VIOLATION)
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Runs the cookie and credential exchange on a freshly connected stream.
///
/// Returns the credential record the peer sent back.  In `strict` mode a
/// cookie echo that differs from `cookie` is rejected; otherwise it is only
/// logged.
///
/// # Errors
///
/// [`BridgeError::HandshakeFailed`] if the peer closes the stream or an I/O
/// error occurs at any step.
pub async fn handshake<S>(
    stream: &mut S,
    cookie: &SocketCookie,
    credentials: &PeerCredentials,
    strict: bool,
) -> Result<PeerCredentials, BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let sent = cookie.to_bytes();
    stream
        .write_all(&sent)
        .await
        .map_err(|e| handshake_error("sending cookie", e))?;

    let mut echo = [0u8; COOKIE_SIZE];
    stream
        .read_exact(&mut echo)
        .await
        .map_err(|e| handshake_error("reading cookie echo", e))?;
    if echo != sent {
        if strict {
            return Err(BridgeError::HandshakeFailed(
                "agent echoed a different cookie".to_string(),
            ));
        }
        debug!("cookie echo differs from the cookie sent, ignored");
        trace!("cookie echo {}", SocketCookie::from_bytes(&echo));
    }

    stream
        .write_all(&credentials.to_bytes())
        .await
        .map_err(|e| handshake_error("sending credentials", e))?;

    let mut peer = [0u8; CREDENTIALS_SIZE];
    stream
        .read_exact(&mut peer)
        .await
        .map_err(|e| handshake_error("reading peer credentials", e))?;

    Ok(PeerCredentials::from_bytes(&peer))
}

fn handshake_error(step: &str, err: io::Error) -> BridgeError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        BridgeError::HandshakeFailed(format!("agent closed the connection while {step}"))
    } else {
        BridgeError::HandshakeFailed(format!("{step}: {err}"))
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

/// A handshaken stream to the agent, reused for every request of one
/// connection.
pub struct EmulatedSocketBackend<S> {
    stream: S,
    max_frame_size: usize,
}

impl<S> EmulatedSocketBackend<S> {
    pub fn new(stream: S, max_frame_size: usize) -> Self {
        Self {
            stream,
            max_frame_size,
        }
    }
}

#[async_trait]
impl<S> Backend for EmulatedSocketBackend<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn kind(&self) -> BackendKind {
        BackendKind::EmulatedSocket
    }

    async fn send_request(&mut self, frame: &[u8]) -> Result<Vec<u8>, BridgeError> {
        write_frame(&mut self.stream, frame)
            .await
            .map_err(agent_side)?;
        read_frame(&mut self.stream, self.max_frame_size)
            .await
            .map_err(agent_side)
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("agent stream shutdown failed: {e}");
        }
    }
}

/// A closed agent stream must not look like a client hanging up.
fn agent_side(err: BridgeError) -> BridgeError {
    match err {
        BridgeError::TransportClosed { received } => BridgeError::backend_unavailable(format!(
            "agent closed the stream after {received} bytes of a reply"
        )),
        other => other,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;
    use uuid::Uuid;

    const SCENARIO_COOKIE_BYTES: [u8; 16] = [
        0x04, 0x03, 0x02, 0x01, 0x08, 0x07, 0x06, 0x05, 0x0c, 0x0b, 0x0a, 0x09, 0x10, 0x0f, 0x0e,
        0x0d,
    ];

    fn scenario_cookie() -> SocketCookie {
        SocketCookie([0x0102_0304, 0x0506_0708, 0x090a_0b0c, 0x0d0e_0f10])
    }

    fn creds() -> PeerCredentials {
        PeerCredentials {
            pid: 0x1234,
            uid: 0,
            gid: 0,
        }
    }

    /// Writes `content` to a uniquely named file in the temp directory.
    fn descriptor_file(content: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("agent-bridge-test-{}", Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    fn socket_config(path: Option<PathBuf>, strict: bool) -> BridgeConfig {
        BridgeConfig {
            backend: BackendKind::EmulatedSocket,
            socket_descriptor: path,
            strict_handshake: strict,
            ..BridgeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_handshake_exact_byte_sequence() {
        // Arrange: cookie out, any echo back, credentials out, peer creds back
        let mut peer_record = [0u8; 12];
        peer_record[..4].copy_from_slice(&99u32.to_le_bytes());
        let mut mock = Builder::new()
            .write(&SCENARIO_COOKIE_BYTES)
            .read(&[0xEE; 16])
            .write(&[0x34, 0x12, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])
            .read(&peer_record)
            .build();

        // Act
        let peer = handshake(&mut mock, &scenario_cookie(), &creds(), false)
            .await
            .unwrap();

        // Assert
        assert_eq!(peer.pid, 99);
        assert_eq!(peer.uid, 0);
    }

    #[tokio::test]
    async fn test_strict_handshake_rejects_wrong_echo() {
        let mut mock = Builder::new()
            .write(&SCENARIO_COOKIE_BYTES)
            .read(&[0xEE; 16])
            .build();

        let err = handshake(&mut mock, &scenario_cookie(), &creds(), true)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::HandshakeFailed(_)));
    }

    #[tokio::test]
    async fn test_strict_handshake_accepts_matching_echo() {
        let mut mock = Builder::new()
            .write(&SCENARIO_COOKIE_BYTES)
            .read(&SCENARIO_COOKIE_BYTES)
            .write(&creds().to_bytes())
            .read(&[0u8; 12])
            .build();

        assert!(handshake(&mut mock, &scenario_cookie(), &creds(), true)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_peer_closing_during_echo_fails_handshake() {
        // Only 10 of 16 echo bytes arrive before EOF.
        let mut mock = Builder::new()
            .write(&SCENARIO_COOKIE_BYTES)
            .read(&[0u8; 10])
            .build();

        let err = handshake(&mut mock, &scenario_cookie(), &creds(), false)
            .await
            .unwrap_err();

        match err {
            BridgeError::HandshakeFailed(msg) => assert!(msg.contains("closed")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backend_forwards_frame_and_reads_reply() {
        let mock = Builder::new()
            .write(&[0, 0, 0, 1, 11])
            .read(&[0, 0, 0, 2, 5])
            .read(&[6])
            .build();
        let mut backend = EmulatedSocketBackend::new(mock, 1024);

        let reply = backend.send_request(&[0, 0, 0, 1, 11]).await.unwrap();

        assert_eq!(reply, vec![0, 0, 0, 2, 5, 6]);
    }

    #[tokio::test]
    async fn test_backend_eof_is_not_a_clean_client_close() {
        let mock = Builder::new().write(&[0, 0, 0, 0]).build();
        let mut backend = EmulatedSocketBackend::new(mock, 1024);

        let err = backend.send_request(&[0, 0, 0, 0]).await.unwrap_err();

        assert!(!err.is_clean_close());
        assert!(matches!(err, BridgeError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_descriptor_setting_is_configuration_missing() {
        let connector = EmulatedSocketConnector::new(&socket_config(None, false));

        let err = connector
            .connect(ConnectionId::new())
            .await
            .err()
            .expect("connect must fail");

        assert!(matches!(err, BridgeError::ConfigurationMissing(_)));
    }

    #[tokio::test]
    async fn test_missing_descriptor_file_is_backend_unavailable() {
        let path = std::env::temp_dir().join(format!("agent-bridge-absent-{}", Uuid::new_v4()));
        let connector = EmulatedSocketConnector::new(&socket_config(Some(path), false));

        let err = connector
            .connect(ConnectionId::new())
            .await
            .err()
            .expect("connect must fail");

        assert!(matches!(err, BridgeError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_descriptor_without_marker_is_protocol_mismatch() {
        let path = descriptor_file(b"12345 s 01020304-05060708-090a0b0c-0d0e0f10");

        let err = read_descriptor(&path, RetryPolicy::default())
            .await
            .unwrap_err();

        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, BridgeError::ProtocolMismatch(_)));
    }

    #[tokio::test]
    async fn test_descriptor_scenario_parses() {
        let path = descriptor_file(b"!<socket >12345 s 01020304-05060708-090a0b0c-0d0e0f10\0");

        let descriptor = read_descriptor(&path, RetryPolicy::default())
            .await
            .unwrap();

        let _ = std::fs::remove_file(&path);
        assert_eq!(descriptor.port, 12345);
        assert_eq!(descriptor.socket_type, 's');
        assert_eq!(descriptor.cookie.to_bytes(), SCENARIO_COOKIE_BYTES);
    }

    #[tokio::test]
    async fn test_refused_port_is_backend_unavailable() {
        // Arrange: bind then drop a listener so the port is known to be closed
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let path = descriptor_file(
            format!("!<socket >{port} s 01020304-05060708-090a0b0c-0d0e0f10").as_bytes(),
        );
        let connector = EmulatedSocketConnector::new(&socket_config(Some(path.clone()), false));

        // Act
        let err = connector
            .connect(ConnectionId::new())
            .await
            .err()
            .expect("connect must fail");

        // Assert
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, BridgeError::BackendUnavailable { .. }));
    }

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_debug_logs_never_contain_the_cookie() {
        // Arrange: debug-level capture and a descriptor for a closed port
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let path = descriptor_file(
            format!("!<socket >{port} s 01020304-05060708-090a0b0c-0d0e0f10").as_bytes(),
        );
        let connector = EmulatedSocketConnector::new(&socket_config(Some(path.clone()), false));

        // Act
        let _ = connector.connect(ConnectionId::new()).await;

        // Assert: the port is logged, the cookie is not
        let _ = std::fs::remove_file(&path);
        let text = logs.text();
        assert!(text.contains(&format!("127.0.0.1:{port}")), "logs: {text}");
        assert!(!text.contains("01020304-05060708"), "logs: {text}");
    }

    #[tokio::test]
    async fn test_connect_handshakes_then_forwards_over_tcp() {
        // Arrange: a fake agent that checks the handshake and answers one frame
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let agent = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut cookie = [0u8; 16];
            sock.read_exact(&mut cookie).await.unwrap();
            sock.write_all(&cookie).await.unwrap();
            let mut ids = [0u8; 12];
            sock.read_exact(&mut ids).await.unwrap();
            sock.write_all(&[7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).await.unwrap();

            let mut request = [0u8; 6];
            sock.read_exact(&mut request).await.unwrap();
            sock.write_all(&[0, 0, 0, 2, 0xEF, 0x01]).await.unwrap();
            (cookie, ids, request)
        });
        let path = descriptor_file(
            format!("!<socket >{port} s 01020304-05060708-090a0b0c-0d0e0f10").as_bytes(),
        );
        let connector = EmulatedSocketConnector::new(&socket_config(Some(path.clone()), true))
            .with_credentials(creds());

        // Act
        let mut backend = connector.connect(ConnectionId::new()).await.unwrap();
        let reply = backend.send_request(&[0, 0, 0, 2, 0xAB, 0xCD]).await.unwrap();
        backend.close().await;

        // Assert
        let _ = std::fs::remove_file(&path);
        let (cookie, ids, request) = agent.await.unwrap();
        assert_eq!(cookie, SCENARIO_COOKIE_BYTES);
        assert_eq!(ids, creds().to_bytes());
        assert_eq!(request, [0, 0, 0, 2, 0xAB, 0xCD]);
        assert_eq!(reply, vec![0, 0, 0, 2, 0xEF, 0x01]);
        assert_eq!(backend.kind(), BackendKind::EmulatedSocket);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_on_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 5,
            delay: Duration::from_millis(10),
        };

        let result: io::Result<()> = retry_on(policy, is_sharing_violation, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(io::Error::from_raw_os_error(ERROR_SHARING_VIOLATION)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_on_succeeds_once_lock_is_released() {
        let calls = AtomicU32::new(0);

        let result = retry_on(RetryPolicy::default(), is_sharing_violation, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(io::Error::from_raw_os_error(ERROR_SHARING_VIOLATION))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_on_does_not_retry_other_errors() {
        let calls = AtomicU32::new(0);

        let result: io::Result<()> = retry_on(RetryPolicy::default(), is_sharing_violation, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(io::Error::from(io::ErrorKind::NotFound)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
