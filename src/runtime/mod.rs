//! MQTT Runtime Module
//!
//! Drives an [`MqttClient`](crate::MqttClient) and hands incoming messages to
//! the application.
//!
//! # Overview
//!
//! - [`SyncLoop`] owns the transport and the receive buffer. Call
//!   [`SyncLoop::sync`] periodically from your own loop, or await
//!   [`SyncLoop::run`] in a dedicated task.
//! - [`MessageSink`] receives every delivered PUBLISH plus [`MqttEvent`]
//!   notifications. It runs outside the client lock, so it may publish.
//! - [`SubscriptionSet`] tracks requested filters for resubscription.
//!
//! # Example
//!
//! ```ignore
//! static CANCEL: CancelToken<CriticalSectionRawMutex> = Signal::new();
//!
//! #[embassy_executor::task]
//! async fn mqtt_sync_task(client: &'static Client) {
//!     let mut rx = [0u8; 1024];
//!     let mut sync = SyncLoop::new(client, &mut rx, from_fn(|topic, payload, _qos| {
//!         info!("{}: {} bytes", topic, payload.len());
//!     }));
//!     if let Err(e) = sync.run(Duration::from_millis(100), &CANCEL).await {
//!         error!("mqtt: {:?}", e);
//!     }
//! }
//! ```

pub(crate) mod event_loop;
pub(crate) mod registry;
pub(crate) mod traits;

pub use event_loop::{CancelToken, SyncLoop};
pub use registry::{MAX_SUBSCRIPTIONS, MAX_TOPIC_LEN, Subscription, SubscriptionSet};
pub use traits::{FnSink, MessageSink, MqttEvent, NoopSink, SinkPair, from_fn};
