//! Transport Driver (spec.md §4.1): the thin abstraction over a full-duplex
//! byte stream. Only this module touches sockets.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::Socket;

use crate::error::{Error, Result};

const MIN_SOCK_BUF: usize = 5 * 1024 * 1024; // 5 MiB, per spec.md §4.1

/// Outcome of polling a driver for readiness (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    DataReady,
    Timeout,
    Disconnected,
}

/// The contract every transport driver must satisfy. The core only ever
/// calls these five operations, and treats the driver as an opaque
/// full-duplex byte stream (spec.md §4.1).
pub trait Driver: Send {
    fn connect(&mut self, host: &str, port: u16, use_tls: bool) -> Result<()>;

    /// Half-close the connection in both directions.
    fn disconnect(&mut self) -> Result<()>;

    /// Release all resources. Idempotent.
    fn close(&mut self);

    /// Write the entire concatenation of `gather`. Partial writes are
    /// retried internally until the gather vector is fully drained or a
    /// fatal error occurs.
    fn send(&mut self, gather: &[Vec<u8>]) -> Result<usize>;

    /// Fill every slice in `gather` completely, or fail.
    fn receive(&mut self, gather: &mut [Vec<u8>]) -> Result<()>;

    /// Wait up to `timeout` for inbound data.
    fn poll(&mut self, timeout: Duration) -> Result<PollOutcome>;
}

enum StreamKind {
    None,
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

/// The one in-scope driver implementation: a stream socket, optionally
/// wrapped in TLS, run in non-blocking mode with partial-read/partial-write
/// loops (spec.md §4.1).
pub struct StreamDriver {
    stream: StreamKind,
}

impl StreamDriver {
    pub fn open() -> StreamDriver {
        StreamDriver {
            stream: StreamKind::None,
        }
    }

    fn set_socket_options(stream: &TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        let sock = Socket::from(stream.try_clone()?);
        let _ = sock.set_send_buffer_size(MIN_SOCK_BUF);
        let _ = sock.set_recv_buffer_size(MIN_SOCK_BUF);
        std::mem::forget(sock); // the Socket and TcpStream share one fd; don't double-close it.
        Ok(())
    }

    fn as_read(&mut self) -> &mut dyn Read {
        match &mut self.stream {
            StreamKind::None => panic!("driver not connected"),
            StreamKind::Plain(s) => s,
            StreamKind::Tls(s) => s.as_mut(),
        }
    }

    fn as_write(&mut self) -> &mut dyn Write {
        match &mut self.stream {
            StreamKind::None => panic!("driver not connected"),
            StreamKind::Plain(s) => s,
            StreamKind::Tls(s) => s.as_mut(),
        }
    }
}

impl Driver for StreamDriver {
    fn connect(&mut self, host: &str, port: u16, use_tls: bool) -> Result<()> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(Error::ConnectFailed)?;

        let mut last_err = None;
        let mut connected = None;
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }

        let stream = connected.ok_or_else(|| {
            Error::ConnectFailed(
                last_err.unwrap_or_else(|| io::Error::new(ErrorKind::NotFound, "no addresses")),
            )
        })?;

        Self::set_socket_options(&stream)?;

        if use_tls {
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| Error::ConnectFailed(io::Error::new(ErrorKind::Other, e)))?;
            // Blocking handshake: briefly take the stream out of non-blocking
            // mode so native-tls's synchronous handshake can complete.
            stream.set_nonblocking(false)?;
            let tls = connector
                .connect(host, stream)
                .map_err(|e| Error::ConnectFailed(io::Error::new(ErrorKind::Other, e)))?;
            tls.get_ref().set_nonblocking(true)?;
            self.stream = StreamKind::Tls(Box::new(tls));
        } else {
            self.stream = StreamKind::Plain(stream);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        match &self.stream {
            StreamKind::Plain(s) => s.shutdown(std::net::Shutdown::Both)?,
            StreamKind::Tls(s) => s.get_ref().shutdown(std::net::Shutdown::Both)?,
            StreamKind::None => return Err(Error::InvalidHandle),
        }
        Ok(())
    }

    fn close(&mut self) {
        self.stream = StreamKind::None;
    }

    fn send(&mut self, gather: &[Vec<u8>]) -> Result<usize> {
        let mut total = 0usize;
        for slice in gather {
            let mut offset = 0usize;
            while offset < slice.len() {
                match self.as_write().write(&slice[offset..]) {
                    Ok(0) => {
                        return Err(Error::IoFailed(io::Error::new(
                            ErrorKind::WriteZero,
                            "write returned 0 before gather vector was drained",
                        )))
                    }
                    Ok(n) => {
                        offset += n;
                        total += n;
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(1));
                        continue;
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::IoFailed(e)),
                }
            }
        }
        Ok(total)
    }

    fn receive(&mut self, gather: &mut [Vec<u8>]) -> Result<()> {
        for slice in gather.iter_mut() {
            let mut offset = 0usize;
            let len = slice.len();
            while offset < len {
                match self.as_read().read(&mut slice[offset..]) {
                    Ok(0) => {
                        return Err(Error::IoFailed(io::Error::new(
                            ErrorKind::UnexpectedEof,
                            "connection closed before gather vector was filled",
                        )))
                    }
                    Ok(n) => offset += n,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(1));
                        continue;
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::IoFailed(e)),
                }
            }
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollOutcome> {
        // Peek the underlying TCP socket without consuming any bytes, so
        // framing reads downstream still see an intact byte stream. For the
        // TLS path this is a readiness heuristic over the raw ciphertext
        // stream rather than decrypted application data, which is
        // sufficient for "is there something to read" (spec.md §4.1) — the
        // subsequent `receive` calls do the real, exact-length reads.
        let underlying: &TcpStream = match &self.stream {
            StreamKind::None => return Err(Error::InvalidHandle),
            StreamKind::Plain(s) => s,
            StreamKind::Tls(s) => s.get_ref(),
        };

        let deadline = std::time::Instant::now() + timeout;
        let mut probe = [0u8; 1];
        loop {
            match underlying.peek(&mut probe) {
                Ok(0) => return Ok(PollOutcome::Disconnected),
                Ok(_) => return Ok(PollOutcome::DataReady),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if std::time::Instant::now() >= deadline {
                        return Ok(PollOutcome::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return Ok(PollOutcome::Disconnected),
            }
        }
    }
}
