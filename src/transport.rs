//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the underlying
//! communication channel (like TCP, UART, etc.), allowing the MQTT client to be
//! hardware and network-stack agnostic.
//!
//! The trait is non-blocking: every call either makes progress immediately or
//! reports [`Poll::Pending`], meaning "would block". The sync loop retries on
//! its next tick, so no waker is ever registered.

use core::fmt::Debug;
use core::task::Poll;

use embassy_futures::poll_once;
use embassy_net::tcp::{Error as TcpError, TcpSocket};
use embedded_io_async::{Read, ReadReady, Write, WriteReady};

/// A connected, ordered, non-blocking byte stream.
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: Debug;

    /// Reads available bytes into `buf`.
    ///
    /// `Ready(Ok(0))` means the peer closed the stream, `Pending` that no
    /// bytes are available right now.
    fn try_read(&mut self, buf: &mut [u8]) -> Poll<Result<usize, Self::Error>>;

    /// Writes as many bytes of `buf` as the stream accepts without blocking.
    ///
    /// `Pending` means the stream cannot take any byte right now.
    fn try_write(&mut self, buf: &[u8]) -> Poll<Result<usize, Self::Error>>;

    /// Closes the stream. Further reads report end of stream.
    fn close(&mut self);
}

impl<T: MqttTransport + ?Sized> MqttTransport for &mut T {
    type Error = T::Error;

    fn try_read(&mut self, buf: &mut [u8]) -> Poll<Result<usize, Self::Error>> {
        (**self).try_read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> Poll<Result<usize, Self::Error>> {
        (**self).try_write(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// TCP transport implementation using `embassy-net`.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> TcpTransport<'a> {
    /// Wraps a socket that is already connected to the broker.
    pub fn new(socket: TcpSocket<'a>) -> Self {
        Self { socket }
    }

    /// Returns the underlying socket.
    pub fn into_inner(self) -> TcpSocket<'a> {
        self.socket
    }
}

impl MqttTransport for TcpTransport<'_> {
    type Error = TcpError;

    fn try_read(&mut self, buf: &mut [u8]) -> Poll<Result<usize, Self::Error>> {
        if !self.socket.can_recv() {
            if !self.socket.may_recv() {
                trace!("TCP connection closed by peer");
                return Poll::Ready(Ok(0));
            }
            return Poll::Pending;
        }
        poll_once(self.socket.read(buf))
    }

    fn try_write(&mut self, buf: &[u8]) -> Poll<Result<usize, Self::Error>> {
        if !self.socket.may_send() {
            return Poll::Ready(Err(TcpError::ConnectionReset));
        }
        if !self.socket.can_send() {
            return Poll::Pending;
        }
        poll_once(self.socket.write(buf))
    }

    fn close(&mut self) {
        self.socket.close();
    }
}

/// Transport over any `embedded-io-async` stream that reports readiness,
/// such as a UART or a modem channel.
pub struct IoTransport<S> {
    stream: S,
    closed: bool,
}

impl<S> IoTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> MqttTransport for IoTransport<S>
where
    S: Read + Write + ReadReady + WriteReady,
{
    type Error = S::Error;

    fn try_read(&mut self, buf: &mut [u8]) -> Poll<Result<usize, Self::Error>> {
        if self.closed {
            return Poll::Ready(Ok(0));
        }
        match self.stream.read_ready() {
            Ok(true) => poll_once(self.stream.read(buf)),
            Ok(false) => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> Poll<Result<usize, Self::Error>> {
        if self.closed {
            return Poll::Ready(Ok(0));
        }
        match self.stream.write_ready() {
            Ok(true) => poll_once(self.stream.write(buf)),
            Ok(false) => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_time::{Duration, Instant};
    use embedded_io_async::{ErrorKind, ErrorType};

    use crate::error::{MqttError, ProtocolError};
    use crate::runtime::{NoopSink, SyncLoop};
    use crate::{MqttClient, MqttOptions};

    /// In-memory stream whose readiness is switched by the test.
    #[derive(Default)]
    struct Stream {
        inbound: std::vec::Vec<u8>,
        outbound: std::vec::Vec<u8>,
        writable: bool,
        broken: bool,
    }

    impl ErrorType for Stream {
        type Error = ErrorKind;
    }

    impl ReadReady for Stream {
        fn read_ready(&mut self) -> Result<bool, ErrorKind> {
            if self.broken {
                return Err(ErrorKind::BrokenPipe);
            }
            Ok(!self.inbound.is_empty())
        }
    }

    impl WriteReady for Stream {
        fn write_ready(&mut self) -> Result<bool, ErrorKind> {
            if self.broken {
                return Err(ErrorKind::BrokenPipe);
            }
            Ok(self.writable)
        }
    }

    impl Read for Stream {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
            let n = buf.len().min(self.inbound.len());
            buf[..n].copy_from_slice(&self.inbound[..n]);
            self.inbound.drain(..n);
            Ok(n)
        }
    }

    impl Write for Stream {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), ErrorKind> {
            Ok(())
        }
    }

    #[test]
    fn not_ready_stream_would_block() {
        let mut transport = IoTransport::new(Stream::default());
        let mut buf = [0u8; 8];
        assert_eq!(transport.try_read(&mut buf), Poll::Pending);
        assert_eq!(transport.try_write(b"abc"), Poll::Pending);
        assert!(transport.into_inner().outbound.is_empty());
    }

    #[test]
    fn ready_stream_passes_bytes_through() {
        let mut transport = IoTransport::new(Stream {
            inbound: b"hello".to_vec(),
            writable: true,
            ..Stream::default()
        });

        let mut buf = [0u8; 3];
        assert_eq!(transport.try_read(&mut buf), Poll::Ready(Ok(3)));
        assert_eq!(&buf, b"hel");
        assert_eq!(transport.try_read(&mut buf), Poll::Ready(Ok(2)));
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(transport.try_read(&mut buf), Poll::Pending);

        assert_eq!(transport.try_write(b"world"), Poll::Ready(Ok(5)));
        assert_eq!(transport.into_inner().outbound, b"world");
    }

    #[test]
    fn readiness_errors_are_reported() {
        let mut transport = IoTransport::new(Stream {
            broken: true,
            ..Stream::default()
        });
        let mut buf = [0u8; 8];
        assert_eq!(
            transport.try_read(&mut buf),
            Poll::Ready(Err(ErrorKind::BrokenPipe))
        );
        assert_eq!(
            transport.try_write(b"x"),
            Poll::Ready(Err(ErrorKind::BrokenPipe))
        );
    }

    #[test]
    fn closed_transport_reports_end_of_stream() {
        let mut transport = IoTransport::new(Stream {
            inbound: b"pending".to_vec(),
            writable: true,
            ..Stream::default()
        });
        transport.close();

        let mut buf = [0u8; 8];
        assert_eq!(transport.try_read(&mut buf), Poll::Ready(Ok(0)));
        assert_eq!(transport.try_write(b"x"), Poll::Ready(Ok(0)));
        assert!(transport.into_inner().outbound.is_empty());
    }

    #[test]
    fn sync_loop_fails_on_a_closed_transport() {
        let mut tx = [0u8; 256];
        let mut store = [0u8; 256];
        let mut rx = [0u8; 256];
        let client: MqttClient<'_, NoopRawMutex, IoTransport<Stream>> =
            MqttClient::new(&mut tx, &mut store);
        let options = MqttOptions::new("io").with_keep_alive(Duration::from_secs(0));

        let mut transport = IoTransport::new(Stream {
            writable: true,
            ..Stream::default()
        });
        transport.close();
        client.connect(transport, &options).unwrap();

        let mut sync = SyncLoop::new(&client, &mut rx, NoopSink);
        assert_eq!(
            sync.sync_at(Instant::from_millis(0)),
            Err(MqttError::Protocol(ProtocolError::ConnectionClosed))
        );
        assert!(!sync.has_transport());
    }
}
