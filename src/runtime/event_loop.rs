//! The sync loop: drives one [`MqttClient`] over its transport.
//!
//! Each call to [`SyncLoop::sync`] performs one bounded, non-blocking pass:
//! adopt a transport staged by `connect`, read and dispatch every complete
//! frame, check keep-alive deadlines and flush queued frames until the
//! transport would block. [`SyncLoop::run`] repeats that on a fixed period
//! until cancelled.

use core::pin::pin;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker};
use futures::future::{Either, select};

use crate::client::{ConnectionState, Dispatch, MqttClient, TransportCommand};
use crate::error::{MqttError, ProtocolError};
use crate::packet::{self, Packet, QoS};
use crate::runtime::traits::MessageSink;
use crate::session::{DEFAULT_FRAMES, DEFAULT_INFLIGHT};
use crate::transport::MqttTransport;

/// Size of the stack buffer queued bytes are copied into before a write.
const WRITE_CHUNK: usize = 128;

/// Cancellation token for [`SyncLoop::run`]. Signal it to stop the loop.
pub type CancelToken<M> = Signal<M, ()>;

/// Drives the protocol of a [`MqttClient`] over the transport it was given.
///
/// `rx` receives bytes from the transport and must hold the largest packet
/// the broker may send. A released QoS 2 message is copied behind the bytes
/// still waiting to be decoded, so `rx` must also fit that message plus any
/// frames the broker sent right after its PUBREL.
pub struct SyncLoop<
    'a,
    'b,
    M,
    T,
    S,
    const INFLIGHT: usize = DEFAULT_INFLIGHT,
    const FRAMES: usize = DEFAULT_FRAMES,
> where
    M: RawMutex,
    T: MqttTransport,
    S: MessageSink,
{
    client: &'a MqttClient<'b, M, T, INFLIGHT, FRAMES>,
    transport: Option<T>,
    rx: &'a mut [u8],
    rx_len: usize,
    sink: S,
    /// A transport was closed because the session ended with `disconnect`.
    finished: bool,
}

impl<'a, 'b, M, T, S, const INFLIGHT: usize, const FRAMES: usize>
    SyncLoop<'a, 'b, M, T, S, INFLIGHT, FRAMES>
where
    M: RawMutex,
    T: MqttTransport,
    S: MessageSink,
{
    pub fn new(
        client: &'a MqttClient<'b, M, T, INFLIGHT, FRAMES>,
        rx: &'a mut [u8],
        sink: S,
    ) -> Self {
        Self {
            client,
            transport: None,
            rx,
            rx_len: 0,
            sink,
            finished: false,
        }
    }

    pub fn sink(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Whether the loop currently owns an open transport.
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Runs one pass using the current time.
    pub fn sync(&mut self) -> Result<(), MqttError<T::Error>> {
        self.sync_at(Instant::now())
    }

    /// Runs one pass as if the current time were `now`.
    ///
    /// Returns `Ok(())` when idle. A fatal error moves the client to
    /// `Error`, closes the transport and is returned; later calls fail with
    /// `NotConnected` until `connect` is called again.
    pub fn sync_at(&mut self, now: Instant) -> Result<(), MqttError<T::Error>> {
        self.apply_transport_command();
        if self.transport.is_none() {
            return match self.client.state() {
                ConnectionState::Error => Err(MqttError::NotConnected),
                _ => Ok(()),
            };
        }

        match self.step(now) {
            Ok(()) => {
                self.apply_transport_command();
                Ok(())
            }
            Err(e) => {
                self.client.fail(e.code());
                self.close_transport();
                Err(e)
            }
        }
    }

    /// Calls [`SyncLoop::sync`] every `period` until `cancel` is signalled,
    /// the client is disconnected or a fatal error occurs.
    ///
    /// A loop started on a client that never connected keeps ticking until
    /// `connect` is called.
    pub async fn run(
        &mut self,
        period: Duration,
        cancel: &CancelToken<M>,
    ) -> Result<(), MqttError<T::Error>> {
        let mut ticker = Ticker::every(period);
        let mut active = false;
        loop {
            if cancel.signaled() {
                info!("sync loop cancelled");
                return Ok(());
            }

            active |= self.is_active();
            self.sync()?;
            active |= self.is_active() || core::mem::take(&mut self.finished);
            if active
                && self.client.state() == ConnectionState::Disconnected
                && self.transport.is_none()
            {
                debug!("sync loop finished, client disconnected");
                return Ok(());
            }

            if let Either::Right(_) = select(pin!(ticker.next()), pin!(cancel.wait())).await {
                info!("sync loop cancelled");
                return Ok(());
            }
        }
    }

    fn is_active(&self) -> bool {
        self.transport.is_some() || self.client.state() != ConnectionState::Disconnected
    }

    fn apply_transport_command(&mut self) {
        match self.client.transport_command() {
            TransportCommand::Keep => {}
            TransportCommand::Adopt(transport) => {
                self.close_transport();
                debug!("transport adopted");
                self.transport = Some(transport);
                self.finished = false;
            }
            TransportCommand::Close => {
                self.close_transport();
                self.finished = true;
            }
        }
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            debug!("transport closed");
        }
        self.rx_len = 0;
    }

    fn step(&mut self, now: Instant) -> Result<(), MqttError<T::Error>> {
        self.receive()?;
        self.client.check_deadlines(now).map_err(|e| e.widen())?;
        self.flush(now)
    }

    fn receive(&mut self) -> Result<(), MqttError<T::Error>> {
        loop {
            if self.rx_len == self.rx.len() {
                error!("incoming packet larger than receive buffer ({} bytes)", self.rx.len());
                return Err(MqttError::BufferTooSmall);
            }
            let Some(transport) = self.transport.as_mut() else {
                return Ok(());
            };
            match transport.try_read(&mut self.rx[self.rx_len..]) {
                Poll::Pending => return Ok(()),
                Poll::Ready(Ok(0)) => {
                    warn!("connection closed by broker");
                    return Err(ProtocolError::ConnectionClosed.into());
                }
                Poll::Ready(Ok(n)) => {
                    self.rx_len += n;
                    self.process_frames()?;
                }
                Poll::Ready(Err(e)) => return Err(MqttError::Transport(e)),
            }
        }
    }

    /// Decodes and dispatches every complete frame in the receive buffer.
    ///
    /// Any error is fatal here, including `QueueFull`: a message whose
    /// acknowledgment cannot be queued must not be silently dropped.
    fn process_frames(&mut self) -> Result<(), MqttError<T::Error>> {
        let mut consumed = 0;
        loop {
            let Some((packet, len)) = packet::decode(&self.rx[consumed..self.rx_len])? else {
                break;
            };
            consumed += len;
            let kind = packet.packet_type();
            trace!("received {:?}", kind);
            let dispatch = self.client.handle_packet(&packet).map_err(|e| {
                error!("cannot handle {:?}: {:?}", kind, e.code());
                e.widen()
            })?;
            match dispatch {
                Dispatch::Nothing => {}
                Dispatch::Deliver => {
                    if let Packet::Publish(publish) = &packet {
                        self.sink
                            .on_message(publish.topic, publish.payload, publish.qos);
                    }
                }
                Dispatch::Release(packet_id) => {
                    drop(packet);
                    self.rx.copy_within(consumed..self.rx_len, 0);
                    self.rx_len -= consumed;
                    consumed = 0;
                    self.deliver_released(packet_id)?;
                }
                Dispatch::Event(event) => self.sink.on_event(event),
            }
        }
        self.rx.copy_within(consumed..self.rx_len, 0);
        self.rx_len -= consumed;
        Ok(())
    }

    /// Hands a released QoS 2 message to the sink, staging it in the free
    /// tail of the receive buffer.
    fn deliver_released(&mut self, packet_id: u16) -> Result<(), MqttError<T::Error>> {
        let scratch = &mut self.rx[self.rx_len..];
        let taken = self.client.take_incoming(packet_id, scratch).map_err(|e| {
            error!("no room to deliver QoS 2 message {}", packet_id);
            e.widen()
        })?;
        let Some((topic_len, payload_len)) = taken else {
            warn!("PUBREL for unknown packet id {}", packet_id);
            return Ok(());
        };
        let (topic, payload) = scratch[..topic_len + payload_len].split_at(topic_len);
        let topic = core::str::from_utf8(topic).map_err(|_| ProtocolError::InvalidUtf8String)?;
        self.sink.on_message(topic, payload, QoS::ExactlyOnce);
        Ok(())
    }

    fn flush(&mut self, now: Instant) -> Result<(), MqttError<T::Error>> {
        let mut chunk = [0u8; WRITE_CHUNK];
        loop {
            let Some(transport) = self.transport.as_mut() else {
                return Ok(());
            };
            let Some((seq, n)) = self.client.next_chunk(&mut chunk) else {
                return Ok(());
            };
            match transport.try_write(&chunk[..n]) {
                Poll::Pending => return Ok(()),
                Poll::Ready(Ok(0)) => return Err(ProtocolError::ConnectionClosed.into()),
                Poll::Ready(Ok(written)) => self.client.advance(seq, written, now),
                Poll::Ready(Err(e)) => return Err(MqttError::Transport(e)),
            }
        }
    }
}
