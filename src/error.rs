//! # Error Types
//!
//! This module defines the error types used throughout the client runtime,
//! from transport failures to protocol violations detected by the codec.

/// An uninhabited transport error.
///
/// The codec and the session bookkeeping never touch the transport, so their
/// results carry `MqttError<NoTransport>`. Such an error can be widened into
/// any `MqttError<T>` with [`MqttError::widen`] without a fallible cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoTransport {}

/// Error returned by client operations and by the sync loop.
///
/// `T` is the error type of the transport the client runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// The transport failed to read or write.
    Transport(T),
    /// A protocol-level error occurred, the byte stream can no longer be trusted.
    Protocol(ProtocolError),
    /// CONNACK carried a non-zero return code.
    ConnectionRefused(ConnectReasonCode),
    /// No PINGRESP (or CONNACK) arrived within the keep-alive interval.
    KeepAliveTimeout,
    /// The client is not in a state that allows the operation.
    NotConnected,
    /// `connect` was called while a session is already being established or active.
    AlreadyConnected,
    /// A buffer provided for an operation was too small.
    BufferTooSmall,
    /// No free frame or in-flight slot is left.
    QueueFull,
}

impl<T> From<ProtocolError> for MqttError<T> {
    fn from(err: ProtocolError) -> Self {
        MqttError::Protocol(err)
    }
}

impl MqttError<NoTransport> {
    /// Converts a transport-free error into an error for any transport type.
    pub fn widen<T>(self) -> MqttError<T> {
        match self {
            MqttError::Transport(never) => match never {},
            MqttError::Protocol(p) => MqttError::Protocol(p),
            MqttError::ConnectionRefused(c) => MqttError::ConnectionRefused(c),
            MqttError::KeepAliveTimeout => MqttError::KeepAliveTimeout,
            MqttError::NotConnected => MqttError::NotConnected,
            MqttError::AlreadyConnected => MqttError::AlreadyConnected,
            MqttError::BufferTooSmall => MqttError::BufferTooSmall,
            MqttError::QueueFull => MqttError::QueueFull,
        }
    }
}

impl<T> MqttError<T> {
    /// Returns the error with the transport payload stripped.
    ///
    /// The session keeps this copy as its last error code, because transport
    /// errors are not required to be `Clone`.
    pub fn code(&self) -> MqttError<()> {
        match self {
            MqttError::Transport(_) => MqttError::Transport(()),
            MqttError::Protocol(p) => MqttError::Protocol(*p),
            MqttError::ConnectionRefused(c) => MqttError::ConnectionRefused(*c),
            MqttError::KeepAliveTimeout => MqttError::KeepAliveTimeout,
            MqttError::NotConnected => MqttError::NotConnected,
            MqttError::AlreadyConnected => MqttError::AlreadyConnected,
            MqttError::BufferTooSmall => MqttError::BufferTooSmall,
            MqttError::QueueFull => MqttError::QueueFull,
        }
    }
}

/// CONNACK return codes of MQTT 3.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// 0x00
    Success,
    /// 0x01, protocol level 4 is not supported.
    UnacceptableProtocolVersion,
    /// 0x02
    IdentifierRejected,
    /// 0x03
    ServerUnavailable,
    /// 0x04
    BadUserNameOrPassword,
    /// 0x05
    NotAuthorized,
    /// A code outside of the MQTT 3.1.1 range.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(code),
        }
    }
}

impl From<ConnectReasonCode> for u8 {
    fn from(code: ConnectReasonCode) -> Self {
        match code {
            ConnectReasonCode::Success => 0,
            ConnectReasonCode::UnacceptableProtocolVersion => 1,
            ConnectReasonCode::IdentifierRejected => 2,
            ConnectReasonCode::ServerUnavailable => 3,
            ConnectReasonCode::BadUserNameOrPassword => 4,
            ConnectReasonCode::NotAuthorized => 5,
            ConnectReasonCode::Other(val) => val,
        }
    }
}

/// A violation of the MQTT wire format or of the packet flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// The fixed header carries a reserved packet type (0 or 15).
    InvalidPacketType(u8),
    /// The bytes do not form a valid control packet.
    MalformedFrame,
    /// The broker sent a packet a client must never receive (e.g. CONNECT).
    UnexpectedPacket(u8),
    /// The peer closed the byte stream.
    ConnectionClosed,
    /// A string or payload exceeds what the wire format can carry.
    PayloadTooLarge,
    /// A length-prefixed string is not UTF-8.
    InvalidUtf8String,
    /// A QoS value other than 0, 1 or 2.
    InvalidQoS(u8),
}
