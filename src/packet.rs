//! # MQTT Packet Structures and Serialization
//!
//! This module defines the MQTT 3.1.1 control packets and the traits for
//! encoding them into, and decoding them from, byte buffers.
//!
//! Decoding is a streaming operation: [`decode`] inspects the front of a
//! buffer and either returns one complete packet together with the number of
//! bytes it occupied, or `Ok(None)` when more bytes are needed. Decoded
//! packets borrow topic names and payloads from the input buffer.

use heapless::Vec;

use crate::error::{ConnectReasonCode, MqttError, ProtocolError};
use crate::util::{
    self, CodecResult, prefixed_len, read_binary, read_u8, read_u16, read_utf8_string,
    write_binary, write_bytes, write_u16, write_utf8_string,
};

/// Protocol name sent in every CONNECT.
const PROTOCOL_NAME: &str = "MQTT";
/// Protocol level for MQTT 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

/// Maximum number of topic filters carried by one SUBSCRIBE / UNSUBSCRIBE / SUBACK.
pub const MAX_FILTERS: usize = 8;

/// SUBACK return code signalling a rejected subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    /// Maps the numeric levels 0, 1 and 2; everything else is rejected.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ProtocolError::InvalidQoS(other)),
        }
    }
}

/// Control packet types, as carried in the high nibble of the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            other => return Err(ProtocolError::InvalidPacketType(other)),
        })
    }
}

impl PacketType {
    /// Flags nibble mandated by the protocol for every type except PUBLISH.
    fn required_flags(self) -> u8 {
        match self {
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => 0b0010,
            _ => 0,
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// First byte of the fixed header: packet type and flags.
    fn header_byte(&self) -> u8;

    /// Length of the variable header plus payload.
    fn remaining_len(&self) -> usize;

    /// Writes the variable header and payload at `cursor`.
    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()>;

    /// Total number of bytes [`EncodePacket::encode`] writes.
    fn encoded_len(&self) -> usize {
        let remaining = self.remaining_len();
        1 + util::variable_byte_integer_len(remaining) + remaining
    }

    /// Serializes the whole packet into `buf`, returning the number of bytes written.
    ///
    /// Nothing is written when the buffer is too small for the packet.
    fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        let remaining = self.remaining_len();
        if remaining > util::MAX_VARIABLE_BYTE_INTEGER {
            return Err(MqttError::Protocol(ProtocolError::PayloadTooLarge));
        }
        let total = self.encoded_len();
        if buf.len() < total {
            return Err(MqttError::BufferTooSmall);
        }

        buf[0] = self.header_byte();
        let mut cursor = 1;
        util::write_variable_byte_integer(&mut cursor, buf, remaining)?;
        self.encode_body(&mut cursor, buf)?;
        debug_assert_eq!(cursor, total);
        Ok(cursor)
    }
}

/// A trait for packets that can be decoded from the body of a complete frame.
pub trait DecodePacket<'a>: Sized {
    /// Decodes the packet from the fixed-header `flags` and the frame `body`
    /// (variable header and payload, without the fixed header).
    fn decode_body(flags: u8, body: &'a [u8]) -> Result<Self, ProtocolError>;
}

/// An enumeration of all MQTT 3.1.1 control packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    Connect(Connect<'a>),
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe(Subscribe<'a>),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe<'a>),
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet<'_> {
    /// The control packet type of this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// The packet identifier, for the packet types that carry one.
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Packet::Publish(p) => p.packet_id,
            Packet::PubAck(id)
            | Packet::PubRec(id)
            | Packet::PubRel(id)
            | Packet::PubComp(id)
            | Packet::UnsubAck(id) => Some(*id),
            Packet::Subscribe(s) => Some(s.packet_id),
            Packet::SubAck(s) => Some(s.packet_id),
            Packet::Unsubscribe(u) => Some(u.packet_id),
            _ => None,
        }
    }
}

impl EncodePacket for Packet<'_> {
    fn header_byte(&self) -> u8 {
        match self {
            Packet::Connect(p) => p.header_byte(),
            Packet::ConnAck(p) => p.header_byte(),
            Packet::Publish(p) => p.header_byte(),
            Packet::Subscribe(p) => p.header_byte(),
            Packet::SubAck(p) => p.header_byte(),
            Packet::Unsubscribe(p) => p.header_byte(),
            other => {
                let packet_type = other.packet_type();
                ((packet_type as u8) << 4) | packet_type.required_flags()
            }
        }
    }

    fn remaining_len(&self) -> usize {
        match self {
            Packet::Connect(p) => p.remaining_len(),
            Packet::ConnAck(p) => p.remaining_len(),
            Packet::Publish(p) => p.remaining_len(),
            Packet::Subscribe(p) => p.remaining_len(),
            Packet::SubAck(p) => p.remaining_len(),
            Packet::Unsubscribe(p) => p.remaining_len(),
            Packet::PubAck(_)
            | Packet::PubRec(_)
            | Packet::PubRel(_)
            | Packet::PubComp(_)
            | Packet::UnsubAck(_) => 2,
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => 0,
        }
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        match self {
            Packet::Connect(p) => p.encode_body(cursor, buf),
            Packet::ConnAck(p) => p.encode_body(cursor, buf),
            Packet::Publish(p) => p.encode_body(cursor, buf),
            Packet::Subscribe(p) => p.encode_body(cursor, buf),
            Packet::SubAck(p) => p.encode_body(cursor, buf),
            Packet::Unsubscribe(p) => p.encode_body(cursor, buf),
            Packet::PubAck(id)
            | Packet::PubRec(id)
            | Packet::PubRel(id)
            | Packet::PubComp(id)
            | Packet::UnsubAck(id) => write_u16(cursor, buf, *id),
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => Ok(()),
        }
    }
}

/// Decodes the first control packet in `buf`.
///
/// Returns the packet and the number of bytes it occupied, or `Ok(None)` if
/// `buf` does not yet hold a complete frame.
pub fn decode(buf: &[u8]) -> Result<Option<(Packet<'_>, usize)>, ProtocolError> {
    let Some(&header) = buf.first() else {
        return Ok(None);
    };
    let packet_type = PacketType::try_from(header >> 4)?;
    let flags = header & 0x0F;

    let mut cursor = 1;
    let Some(remaining_len) = util::read_variable_byte_integer(&mut cursor, buf)? else {
        return Ok(None);
    };
    let end = cursor + remaining_len;
    if buf.len() < end {
        return Ok(None);
    }
    let body = &buf[cursor..end];

    if packet_type != PacketType::Publish && flags != packet_type.required_flags() {
        return Err(ProtocolError::MalformedFrame);
    }

    let packet = match packet_type {
        PacketType::Connect => Packet::Connect(Connect::decode_body(flags, body)?),
        PacketType::ConnAck => Packet::ConnAck(ConnAck::decode_body(flags, body)?),
        PacketType::Publish => Packet::Publish(Publish::decode_body(flags, body)?),
        PacketType::PubAck => Packet::PubAck(decode_packet_id(body)?),
        PacketType::PubRec => Packet::PubRec(decode_packet_id(body)?),
        PacketType::PubRel => Packet::PubRel(decode_packet_id(body)?),
        PacketType::PubComp => Packet::PubComp(decode_packet_id(body)?),
        PacketType::Subscribe => Packet::Subscribe(Subscribe::decode_body(flags, body)?),
        PacketType::SubAck => Packet::SubAck(SubAck::decode_body(flags, body)?),
        PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::decode_body(flags, body)?),
        PacketType::UnsubAck => Packet::UnsubAck(decode_packet_id(body)?),
        PacketType::PingReq => decode_empty(body, Packet::PingReq)?,
        PacketType::PingResp => decode_empty(body, Packet::PingResp)?,
        PacketType::Disconnect => decode_empty(body, Packet::Disconnect)?,
    };

    Ok(Some((packet, end)))
}

fn decode_packet_id(body: &[u8]) -> Result<u16, ProtocolError> {
    if body.len() != 2 {
        return Err(ProtocolError::MalformedFrame);
    }
    let mut cursor = 0;
    read_u16(&mut cursor, body)
}

fn decode_empty<'a>(body: &[u8], packet: Packet<'a>) -> Result<Packet<'a>, ProtocolError> {
    if body.is_empty() {
        Ok(packet)
    } else {
        Err(ProtocolError::MalformedFrame)
    }
}

// --- CONNECT Packet ---

/// The message the broker publishes on the client's behalf if it vanishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastWill<'a> {
    pub topic: &'a str,
    pub message: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect<'a> {
    pub client_id: &'a str,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub will: Option<LastWill<'a>>,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            will: None,
            username: None,
            password: None,
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        flags
    }
}

impl EncodePacket for Connect<'_> {
    fn header_byte(&self) -> u8 {
        (PacketType::Connect as u8) << 4
    }

    fn remaining_len(&self) -> usize {
        // Protocol name, level, flags, keep-alive.
        let mut len = prefixed_len(PROTOCOL_NAME.as_bytes()) + 1 + 1 + 2;
        len += prefixed_len(self.client_id.as_bytes());
        if let Some(will) = &self.will {
            len += prefixed_len(will.topic.as_bytes()) + prefixed_len(will.message);
        }
        if let Some(username) = self.username {
            len += prefixed_len(username.as_bytes());
        }
        if let Some(password) = self.password {
            len += prefixed_len(password);
        }
        len
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        write_utf8_string(cursor, buf, PROTOCOL_NAME)?;
        write_bytes(cursor, buf, &[PROTOCOL_LEVEL, self.flags()])?;
        write_u16(cursor, buf, self.keep_alive)?;
        write_utf8_string(cursor, buf, self.client_id)?;
        if let Some(will) = &self.will {
            write_utf8_string(cursor, buf, will.topic)?;
            write_binary(cursor, buf, will.message)?;
        }
        if let Some(username) = self.username {
            write_utf8_string(cursor, buf, username)?;
        }
        if let Some(password) = self.password {
            write_binary(cursor, buf, password)?;
        }
        Ok(())
    }
}

impl<'a> DecodePacket<'a> for Connect<'a> {
    fn decode_body(_flags: u8, body: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut cursor = 0;
        if read_utf8_string(&mut cursor, body)? != PROTOCOL_NAME
            || read_u8(&mut cursor, body)? != PROTOCOL_LEVEL
        {
            return Err(ProtocolError::MalformedFrame);
        }
        let flags = read_u8(&mut cursor, body)?;
        if flags & 0x01 != 0 {
            return Err(ProtocolError::MalformedFrame);
        }
        let keep_alive = read_u16(&mut cursor, body)?;
        let client_id = read_utf8_string(&mut cursor, body)?;

        let will = if flags & 0x04 != 0 {
            let topic = read_utf8_string(&mut cursor, body)?;
            let message = read_binary(&mut cursor, body)?;
            Some(LastWill {
                topic,
                message,
                qos: QoS::try_from((flags >> 3) & 0x03)?,
                retain: flags & 0x20 != 0,
            })
        } else {
            None
        };
        let username = if flags & 0x80 != 0 {
            Some(read_utf8_string(&mut cursor, body)?)
        } else {
            None
        };
        let password = if flags & 0x40 != 0 {
            Some(read_binary(&mut cursor, body)?)
        } else {
            None
        };
        if cursor != body.len() {
            return Err(ProtocolError::MalformedFrame);
        }

        Ok(Self {
            client_id,
            keep_alive,
            clean_session: flags & 0x02 != 0,
            will,
            username,
            password,
        })
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub code: ConnectReasonCode,
}

impl EncodePacket for ConnAck {
    fn header_byte(&self) -> u8 {
        (PacketType::ConnAck as u8) << 4
    }

    fn remaining_len(&self) -> usize {
        2
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        write_bytes(
            cursor,
            buf,
            &[u8::from(self.session_present), u8::from(self.code)],
        )
    }
}

impl<'a> DecodePacket<'a> for ConnAck {
    fn decode_body(_flags: u8, body: &'a [u8]) -> Result<Self, ProtocolError> {
        let [ack_flags, code] = body else {
            return Err(ProtocolError::MalformedFrame);
        };
        if ack_flags & 0xFE != 0 {
            return Err(ProtocolError::MalformedFrame);
        }
        Ok(Self {
            session_present: ack_flags & 0x01 != 0,
            code: ConnectReasonCode::from(*code),
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: &'a str,
    /// Present exactly when `qos` is above `AtMostOnce`.
    pub packet_id: Option<u16>,
    pub payload: &'a [u8],
}

impl<'a> Publish<'a> {
    pub fn new(topic: &'a str, payload: &'a [u8], qos: QoS) -> Self {
        Self {
            dup: false,
            qos,
            retain: false,
            topic,
            packet_id: None,
            payload,
        }
    }
}

/// Bit of the PUBLISH fixed header marking a redelivery.
pub(crate) const PUBLISH_DUP_FLAG: u8 = 0x08;

impl EncodePacket for Publish<'_> {
    fn header_byte(&self) -> u8 {
        let mut header = ((PacketType::Publish as u8) << 4) | ((self.qos as u8) << 1);
        if self.dup {
            header |= PUBLISH_DUP_FLAG;
        }
        if self.retain {
            header |= 0x01;
        }
        header
    }

    fn remaining_len(&self) -> usize {
        let id_len = if self.qos == QoS::AtMostOnce { 0 } else { 2 };
        prefixed_len(self.topic.as_bytes()) + id_len + self.payload.len()
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        write_utf8_string(cursor, buf, self.topic)?;
        if self.qos != QoS::AtMostOnce {
            let id = self
                .packet_id
                .ok_or(MqttError::Protocol(ProtocolError::MalformedFrame))?;
            write_u16(cursor, buf, id)?;
        }
        write_bytes(cursor, buf, self.payload)
    }
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode_body(flags: u8, body: &'a [u8]) -> Result<Self, ProtocolError> {
        let qos = match (flags >> 1) & 0x03 {
            3 => return Err(ProtocolError::MalformedFrame),
            level => QoS::try_from(level)?,
        };

        let mut cursor = 0;
        let topic = read_utf8_string(&mut cursor, body)?;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => match read_u16(&mut cursor, body)? {
                0 => return Err(ProtocolError::MalformedFrame),
                id => Some(id),
            },
        };

        Ok(Publish {
            dup: flags & PUBLISH_DUP_FLAG != 0,
            qos,
            retain: flags & 0x01 != 0,
            topic,
            packet_id,
            payload: &body[cursor..],
        })
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub filters: Vec<(&'a str, QoS), MAX_FILTERS>,
}

impl<'a> Subscribe<'a> {
    /// Creates a new Subscribe packet with a single topic filter.
    pub fn new(packet_id: u16, filter: &'a str, qos: QoS) -> Self {
        let mut filters = Vec::new();
        let _ = filters.push((filter, qos));
        Self { packet_id, filters }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn header_byte(&self) -> u8 {
        ((PacketType::Subscribe as u8) << 4) | PacketType::Subscribe.required_flags()
    }

    fn remaining_len(&self) -> usize {
        2 + self
            .filters
            .iter()
            .map(|(filter, _)| prefixed_len(filter.as_bytes()) + 1)
            .sum::<usize>()
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        write_u16(cursor, buf, self.packet_id)?;
        for (filter, qos) in &self.filters {
            write_utf8_string(cursor, buf, filter)?;
            write_bytes(cursor, buf, &[*qos as u8])?;
        }
        Ok(())
    }
}

impl<'a> DecodePacket<'a> for Subscribe<'a> {
    fn decode_body(_flags: u8, body: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut cursor = 0;
        let packet_id = read_u16(&mut cursor, body)?;
        let mut filters = Vec::new();
        while cursor < body.len() {
            let filter = read_utf8_string(&mut cursor, body)?;
            let options = read_u8(&mut cursor, body)?;
            if options & 0xFC != 0 {
                return Err(ProtocolError::MalformedFrame);
            }
            filters
                .push((filter, QoS::try_from(options)?))
                .map_err(|_| ProtocolError::MalformedFrame)?;
        }
        if filters.is_empty() {
            return Err(ProtocolError::MalformedFrame);
        }
        Ok(Subscribe { packet_id, filters })
    }
}

// --- SUBACK Packet ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8, MAX_FILTERS>,
}

impl SubAck {
    /// The QoS granted for the filter at `index`, `None` if it was rejected.
    pub fn granted(&self, index: usize) -> Option<QoS> {
        self.return_codes
            .get(index)
            .and_then(|code| QoS::try_from(*code).ok())
    }
}

impl EncodePacket for SubAck {
    fn header_byte(&self) -> u8 {
        (PacketType::SubAck as u8) << 4
    }

    fn remaining_len(&self) -> usize {
        2 + self.return_codes.len()
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        write_u16(cursor, buf, self.packet_id)?;
        write_bytes(cursor, buf, &self.return_codes)
    }
}

impl<'a> DecodePacket<'a> for SubAck {
    fn decode_body(_flags: u8, body: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut cursor = 0;
        let packet_id = read_u16(&mut cursor, body)?;
        let codes = &body[cursor..];
        if codes.is_empty()
            || codes
                .iter()
                .any(|code| !matches!(*code, 0 | 1 | 2 | SUBACK_FAILURE))
        {
            return Err(ProtocolError::MalformedFrame);
        }
        let return_codes = Vec::from_slice(codes).map_err(|_| ProtocolError::MalformedFrame)?;
        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }
}

// --- UNSUBSCRIBE Packet ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe<'a> {
    pub packet_id: u16,
    pub filters: Vec<&'a str, MAX_FILTERS>,
}

impl<'a> Unsubscribe<'a> {
    /// Creates a new Unsubscribe packet with a single topic filter.
    pub fn new(packet_id: u16, filter: &'a str) -> Self {
        let mut filters = Vec::new();
        let _ = filters.push(filter);
        Self { packet_id, filters }
    }
}

impl EncodePacket for Unsubscribe<'_> {
    fn header_byte(&self) -> u8 {
        ((PacketType::Unsubscribe as u8) << 4) | PacketType::Unsubscribe.required_flags()
    }

    fn remaining_len(&self) -> usize {
        2 + self
            .filters
            .iter()
            .map(|filter| prefixed_len(filter.as_bytes()))
            .sum::<usize>()
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> CodecResult<()> {
        write_u16(cursor, buf, self.packet_id)?;
        for filter in &self.filters {
            write_utf8_string(cursor, buf, filter)?;
        }
        Ok(())
    }
}

impl<'a> DecodePacket<'a> for Unsubscribe<'a> {
    fn decode_body(_flags: u8, body: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut cursor = 0;
        let packet_id = read_u16(&mut cursor, body)?;
        let mut filters = Vec::new();
        while cursor < body.len() {
            filters
                .push(read_utf8_string(&mut cursor, body)?)
                .map_err(|_| ProtocolError::MalformedFrame)?;
        }
        if filters.is_empty() {
            return Err(ProtocolError::MalformedFrame);
        }
        Ok(Unsubscribe { packet_id, filters })
    }
}
