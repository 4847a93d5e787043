//! Client-facing endpoint: a named pipe on Windows, a Unix socket elsewhere.
//!
//! Both variants expose the same two operations, `bind` and `accept`, and
//! hand out an [`EndpointStream`] that implements `AsyncRead + AsyncWrite`.

use std::io;

#[cfg(unix)]
pub use unix_impl::{EndpointListener, EndpointStream};
#[cfg(windows)]
pub use windows_impl::{EndpointListener, EndpointStream};

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tokio::net::UnixListener;
    use tracing::debug;

    /// A connected client.
    pub type EndpointStream = tokio::net::UnixStream;

    /// Unix domain socket listener.  Removes its socket file on drop.
    pub struct EndpointListener {
        listener: UnixListener,
        path: PathBuf,
    }

    impl EndpointListener {
        /// Binds `path`, replacing a stale socket file and restricting the
        /// new one to the current user (mode 0600).
        ///
        /// `_buffer_size` exists for parity with named pipes; Unix sockets
        /// size their buffers themselves.
        pub fn bind(path: &str, _buffer_size: usize) -> io::Result<Self> {
            let path = PathBuf::from(path);
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("removed stale socket {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }

            let listener = UnixListener::bind(&path)?;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;

            Ok(Self { listener, path })
        }

        pub async fn accept(&mut self) -> io::Result<EndpointStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(stream)
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for EndpointListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use std::path::Path;
    use std::pin::Pin;
    use std::task::{ready, Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::net::windows::named_pipe::{NamedPipeServer, PipeMode, ServerOptions};

    /// Named pipe server.  One pipe instance is always waiting for the next
    /// client; it is replaced by a fresh instance as soon as a client
    /// connects.
    pub struct EndpointListener {
        path: String,
        buffer_size: u32,
        next: NamedPipeServer,
    }

    /// A connected pipe instance.  Shutting it down disconnects the client.
    pub struct EndpointStream {
        pipe: NamedPipeServer,
    }

    impl EndpointListener {
        /// Creates the first pipe instance.  Fails if another process already
        /// serves `path`.
        pub fn bind(path: &str, buffer_size: usize) -> io::Result<Self> {
            let buffer_size = u32::try_from(buffer_size).unwrap_or(u32::MAX);
            let next = create_instance(path, buffer_size, true)?;
            Ok(Self {
                path: path.to_string(),
                buffer_size,
                next,
            })
        }

        pub async fn accept(&mut self) -> io::Result<EndpointStream> {
            self.next.connect().await?;
            let fresh = create_instance(&self.path, self.buffer_size, false)?;
            let pipe = std::mem::replace(&mut self.next, fresh);
            Ok(EndpointStream { pipe })
        }

        pub fn path(&self) -> &Path {
            Path::new(&self.path)
        }
    }

    fn create_instance(path: &str, buffer_size: u32, first: bool) -> io::Result<NamedPipeServer> {
        ServerOptions::new()
            .first_pipe_instance(first)
            .pipe_mode(PipeMode::Byte)
            .in_buffer_size(buffer_size)
            .out_buffer_size(buffer_size)
            .create(path)
    }

    impl AsyncRead for EndpointStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.pipe).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for EndpointStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.pipe).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.pipe).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            ready!(Pin::new(&mut self.pipe).poll_shutdown(cx))?;
            Poll::Ready(self.pipe.disconnect())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
