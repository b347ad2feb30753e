//! # Non-blocking MQTT Client for Embedded Systems
//!
//! `myrtio-mqtt-sync` is a `no_std` MQTT 3.1.1 client runtime for devices that
//! talk to a broker over a non-blocking byte stream. Application calls queue
//! packets and return immediately; a periodic sync step moves bytes, advances
//! the protocol handshakes and delivers incoming messages.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Collections are bounded `heapless` types and
//!   byte buffers are provided by the caller.
//! - **QoS 0, 1 & 2:** Full publish and receive handshakes, including QoS 2
//!   de-duplication and session resumption with DUP retransmission.
//! - **Shareable client:** State lives behind an `embassy-sync` blocking mutex,
//!   so any task can publish while another drives the connection.
//! - **Transport Agnostic:** The `MqttTransport` trait works over any ordered
//!   byte stream. Adapters for `embassy-net` TCP sockets and
//!   `embedded-io-async` streams are included.
//!
//! ## Architecture
//!
//! ```ignore
//! let client: MqttClient<'_, NoopRawMutex, TcpTransport> = MqttClient::new(&mut tx_buf, &mut incoming_buf);
//! let options = MqttOptions::new("myrt-device-01").with_keep_alive(Duration::from_secs(15));
//! client.connect(TcpTransport::new(socket), &options)?;
//! client.subscribe("device/cmd", QoS::AtLeastOnce)?;
//!
//! let mut sync = SyncLoop::new(&client, &mut rx_buf, NoopSink);
//! loop {
//!     sync.sync()?;
//!     Timer::after_millis(100).await;
//! }
//! ```
//!
//! ## Logging
//!
//! Enable the `log` or the `defmt` feature to get connection lifecycle logs.
//! Without either, logging compiles to nothing.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod client;
pub mod error;
pub mod packet;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use client::{ConnectionState, MqttClient, MqttOptions};
pub use error::{ConnectReasonCode, MqttError, ProtocolError};
pub use packet::QoS;
pub use runtime::{CancelToken, MessageSink, MqttEvent, SyncLoop};
pub use transport::{IoTransport, MqttTransport, TcpTransport};
