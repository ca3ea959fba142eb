//! v5 property sections: a var-int byte count followed by entries keyed by
//! a single identifier byte.

use std::num::{NonZeroU16, NonZeroU32};

use bytes::{BufMut, Bytes, BytesMut};
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::types::QoS;
use crate::wire;

/// Property identifier bytes.
pub(crate) mod property {
    pub(crate) const PAYLOAD_FORMAT: u8 = 0x01;
    pub(crate) const MESSAGE_EXPIRY: u8 = 0x02;
    pub(crate) const CONTENT_TYPE: u8 = 0x03;
    pub(crate) const RESPONSE_TOPIC: u8 = 0x08;
    pub(crate) const CORRELATION_DATA: u8 = 0x09;
    pub(crate) const SUBSCRIPTION_ID: u8 = 0x0b;
    pub(crate) const SESSION_EXPIRY: u8 = 0x11;
    pub(crate) const ASSIGNED_CLIENT_ID: u8 = 0x12;
    pub(crate) const SERVER_KEEP_ALIVE: u8 = 0x13;
    pub(crate) const AUTH_METHOD: u8 = 0x15;
    pub(crate) const AUTH_DATA: u8 = 0x16;
    pub(crate) const REQUEST_PROBLEM_INFO: u8 = 0x17;
    pub(crate) const WILL_DELAY: u8 = 0x18;
    pub(crate) const REQUEST_RESPONSE_INFO: u8 = 0x19;
    pub(crate) const RESPONSE_INFO: u8 = 0x1a;
    pub(crate) const SERVER_REFERENCE: u8 = 0x1c;
    pub(crate) const REASON_STRING: u8 = 0x1f;
    pub(crate) const RECEIVE_MAXIMUM: u8 = 0x21;
    pub(crate) const TOPIC_ALIAS_MAXIMUM: u8 = 0x22;
    pub(crate) const TOPIC_ALIAS: u8 = 0x23;
    pub(crate) const MAXIMUM_QOS: u8 = 0x24;
    pub(crate) const RETAIN_AVAILABLE: u8 = 0x25;
    pub(crate) const USER_PROPERTY: u8 = 0x26;
    pub(crate) const MAXIMUM_PACKET_SIZE: u8 = 0x27;
    pub(crate) const WILDCARD_SUB_AVAILABLE: u8 = 0x28;
    pub(crate) const SUB_ID_AVAILABLE: u8 = 0x29;
    pub(crate) const SHARED_SUB_AVAILABLE: u8 = 0x2a;
}

use self::property as prop;

/// Every property the client recognizes, across all packet kinds.
///
/// One flat structure keeps the client-side surface small; which entries a
/// peer may legally send per packet kind is left to the broker to respect.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct Properties {
    pub payload_format_indicator: Option<bool>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<ByteString>,
    pub response_topic: Option<ByteString>,
    pub correlation_data: Option<Bytes>,
    pub subscription_ids: Vec<NonZeroU32>,
    pub session_expiry_interval: Option<u32>,
    pub assigned_client_id: Option<ByteString>,
    pub server_keepalive: Option<u16>,
    pub auth_method: Option<ByteString>,
    pub auth_data: Option<Bytes>,
    pub request_problem_info: Option<bool>,
    pub will_delay_interval: Option<u32>,
    pub request_response_info: Option<bool>,
    pub response_info: Option<ByteString>,
    pub server_reference: Option<ByteString>,
    pub reason_string: Option<ByteString>,
    pub receive_maximum: Option<NonZeroU16>,
    pub topic_alias_maximum: Option<u16>,
    pub topic_alias: Option<NonZeroU16>,
    pub maximum_qos: Option<QoS>,
    pub retain_available: Option<bool>,
    pub user_properties: Vec<(ByteString, ByteString)>,
    pub maximum_packet_size: Option<NonZeroU32>,
    pub wildcard_subscription_available: Option<bool>,
    pub subscription_id_available: Option<bool>,
    pub shared_subscription_available: Option<bool>,
}

/// Single-valued properties may appear once per section.
fn set_once<T>(slot: &mut Option<T>, value: T) -> Result<(), DecodeError> {
    if slot.replace(value).is_some() {
        return Err(DecodeError::DuplicateProperty);
    }
    Ok(())
}

impl Properties {
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Properties::default()
    }

    /// Reads one property section, var-int byte count included.
    pub(crate) fn decode(src: &mut Bytes) -> Result<Properties, DecodeError> {
        let count = wire::read_var_int(src)? as usize;
        if src.len() < count {
            return Err(DecodeError::InvalidLength);
        }
        let mut section = src.split_to(count);

        let mut props = Properties::default();
        while !section.is_empty() {
            let src = &mut section;
            match wire::read_u8(src)? {
                prop::PAYLOAD_FORMAT => {
                    set_once(&mut props.payload_format_indicator, wire::read_bool(src)?)?
                }
                prop::MESSAGE_EXPIRY => set_once(&mut props.message_expiry_interval, wire::read_u32(src)?)?,
                prop::CONTENT_TYPE => set_once(&mut props.content_type, wire::read_string(src)?)?,
                prop::RESPONSE_TOPIC => set_once(&mut props.response_topic, wire::read_string(src)?)?,
                prop::CORRELATION_DATA => set_once(&mut props.correlation_data, wire::read_bytes(src)?)?,
                prop::SUBSCRIPTION_ID => {
                    let id = wire::read_var_int(src)?;
                    props.subscription_ids.push(NonZeroU32::new(id).ok_or(DecodeError::MalformedPacket)?);
                }
                prop::SESSION_EXPIRY => set_once(&mut props.session_expiry_interval, wire::read_u32(src)?)?,
                prop::ASSIGNED_CLIENT_ID => set_once(&mut props.assigned_client_id, wire::read_string(src)?)?,
                prop::SERVER_KEEP_ALIVE => set_once(&mut props.server_keepalive, wire::read_u16(src)?)?,
                prop::AUTH_METHOD => set_once(&mut props.auth_method, wire::read_string(src)?)?,
                prop::AUTH_DATA => set_once(&mut props.auth_data, wire::read_bytes(src)?)?,
                prop::REQUEST_PROBLEM_INFO => {
                    set_once(&mut props.request_problem_info, wire::read_bool(src)?)?
                }
                prop::WILL_DELAY => set_once(&mut props.will_delay_interval, wire::read_u32(src)?)?,
                prop::REQUEST_RESPONSE_INFO => {
                    set_once(&mut props.request_response_info, wire::read_bool(src)?)?
                }
                prop::RESPONSE_INFO => set_once(&mut props.response_info, wire::read_string(src)?)?,
                prop::SERVER_REFERENCE => set_once(&mut props.server_reference, wire::read_string(src)?)?,
                prop::REASON_STRING => set_once(&mut props.reason_string, wire::read_string(src)?)?,
                prop::RECEIVE_MAXIMUM => set_once(
                    &mut props.receive_maximum,
                    NonZeroU16::new(wire::read_u16(src)?).ok_or(DecodeError::MalformedPacket)?,
                )?,
                prop::TOPIC_ALIAS_MAXIMUM => {
                    set_once(&mut props.topic_alias_maximum, wire::read_u16(src)?)?
                }
                prop::TOPIC_ALIAS => set_once(
                    &mut props.topic_alias,
                    NonZeroU16::new(wire::read_u16(src)?).ok_or(DecodeError::MalformedPacket)?,
                )?,
                prop::MAXIMUM_QOS => {
                    set_once(&mut props.maximum_qos, QoS::try_from(wire::read_u8(src)?)?)?
                }
                prop::RETAIN_AVAILABLE => set_once(&mut props.retain_available, wire::read_bool(src)?)?,
                prop::USER_PROPERTY => {
                    let key = wire::read_string(src)?;
                    let value = wire::read_string(src)?;
                    props.user_properties.push((key, value));
                }
                prop::MAXIMUM_PACKET_SIZE => set_once(
                    &mut props.maximum_packet_size,
                    NonZeroU32::new(wire::read_u32(src)?).ok_or(DecodeError::MalformedPacket)?,
                )?,
                prop::WILDCARD_SUB_AVAILABLE => {
                    set_once(&mut props.wildcard_subscription_available, wire::read_bool(src)?)?
                }
                prop::SUB_ID_AVAILABLE => {
                    set_once(&mut props.subscription_id_available, wire::read_bool(src)?)?
                }
                prop::SHARED_SUB_AVAILABLE => {
                    set_once(&mut props.shared_subscription_available, wire::read_bool(src)?)?
                }
                _ => return Err(DecodeError::MalformedPacket),
            }
        }
        Ok(props)
    }

    /// Byte count of the entries alone, excluding the leading var-int.
    fn entry_bytes(&self) -> usize {
        let mut n = 0;
        if self.payload_format_indicator.is_some() {
            n += 2;
        }
        if self.message_expiry_interval.is_some() {
            n += 5;
        }
        if let Some(s) = &self.content_type {
            n += 3 + s.len();
        }
        if let Some(s) = &self.response_topic {
            n += 3 + s.len();
        }
        if let Some(b) = &self.correlation_data {
            n += 3 + b.len();
        }
        for id in &self.subscription_ids {
            n += 1 + wire::var_int_len(id.get() as usize);
        }
        if self.session_expiry_interval.is_some() {
            n += 5;
        }
        if let Some(s) = &self.assigned_client_id {
            n += 3 + s.len();
        }
        if self.server_keepalive.is_some() {
            n += 3;
        }
        if let Some(s) = &self.auth_method {
            n += 3 + s.len();
        }
        if let Some(b) = &self.auth_data {
            n += 3 + b.len();
        }
        if self.request_problem_info.is_some() {
            n += 2;
        }
        if self.will_delay_interval.is_some() {
            n += 5;
        }
        if self.request_response_info.is_some() {
            n += 2;
        }
        if let Some(s) = &self.response_info {
            n += 3 + s.len();
        }
        if let Some(s) = &self.server_reference {
            n += 3 + s.len();
        }
        if let Some(s) = &self.reason_string {
            n += 3 + s.len();
        }
        if self.receive_maximum.is_some() {
            n += 3;
        }
        if self.topic_alias_maximum.is_some() {
            n += 3;
        }
        if self.topic_alias.is_some() {
            n += 3;
        }
        if self.maximum_qos.is_some() {
            n += 2;
        }
        if self.retain_available.is_some() {
            n += 2;
        }
        for (key, value) in &self.user_properties {
            n += 5 + key.len() + value.len();
        }
        if self.maximum_packet_size.is_some() {
            n += 5;
        }
        if self.wildcard_subscription_available.is_some() {
            n += 2;
        }
        if self.subscription_id_available.is_some() {
            n += 2;
        }
        if self.shared_subscription_available.is_some() {
            n += 2;
        }
        n
    }

    /// Encoded size including the leading byte count.
    pub(crate) fn encoded_len(&self) -> usize {
        let entries = self.entry_bytes();
        wire::var_int_len(entries) + entries
    }

    pub(crate) fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        wire::write_var_int(self.entry_bytes() as u32, dst);
        if let Some(v) = self.payload_format_indicator {
            dst.put_u8(prop::PAYLOAD_FORMAT);
            dst.put_u8(v as u8);
        }
        if let Some(v) = self.message_expiry_interval {
            dst.put_u8(prop::MESSAGE_EXPIRY);
            dst.put_u32(v);
        }
        if let Some(s) = &self.content_type {
            dst.put_u8(prop::CONTENT_TYPE);
            wire::write_string(s, dst)?;
        }
        if let Some(s) = &self.response_topic {
            dst.put_u8(prop::RESPONSE_TOPIC);
            wire::write_string(s, dst)?;
        }
        if let Some(b) = &self.correlation_data {
            dst.put_u8(prop::CORRELATION_DATA);
            wire::write_bytes(b, dst)?;
        }
        for id in &self.subscription_ids {
            dst.put_u8(prop::SUBSCRIPTION_ID);
            wire::write_var_int(id.get(), dst);
        }
        if let Some(v) = self.session_expiry_interval {
            dst.put_u8(prop::SESSION_EXPIRY);
            dst.put_u32(v);
        }
        if let Some(s) = &self.assigned_client_id {
            dst.put_u8(prop::ASSIGNED_CLIENT_ID);
            wire::write_string(s, dst)?;
        }
        if let Some(v) = self.server_keepalive {
            dst.put_u8(prop::SERVER_KEEP_ALIVE);
            dst.put_u16(v);
        }
        if let Some(s) = &self.auth_method {
            dst.put_u8(prop::AUTH_METHOD);
            wire::write_string(s, dst)?;
        }
        if let Some(b) = &self.auth_data {
            dst.put_u8(prop::AUTH_DATA);
            wire::write_bytes(b, dst)?;
        }
        if let Some(v) = self.request_problem_info {
            dst.put_u8(prop::REQUEST_PROBLEM_INFO);
            dst.put_u8(v as u8);
        }
        if let Some(v) = self.will_delay_interval {
            dst.put_u8(prop::WILL_DELAY);
            dst.put_u32(v);
        }
        if let Some(v) = self.request_response_info {
            dst.put_u8(prop::REQUEST_RESPONSE_INFO);
            dst.put_u8(v as u8);
        }
        if let Some(s) = &self.response_info {
            dst.put_u8(prop::RESPONSE_INFO);
            wire::write_string(s, dst)?;
        }
        if let Some(s) = &self.server_reference {
            dst.put_u8(prop::SERVER_REFERENCE);
            wire::write_string(s, dst)?;
        }
        if let Some(s) = &self.reason_string {
            dst.put_u8(prop::REASON_STRING);
            wire::write_string(s, dst)?;
        }
        if let Some(v) = self.receive_maximum {
            dst.put_u8(prop::RECEIVE_MAXIMUM);
            dst.put_u16(v.get());
        }
        if let Some(v) = self.topic_alias_maximum {
            dst.put_u8(prop::TOPIC_ALIAS_MAXIMUM);
            dst.put_u16(v);
        }
        if let Some(v) = self.topic_alias {
            dst.put_u8(prop::TOPIC_ALIAS);
            dst.put_u16(v.get());
        }
        if let Some(qos) = self.maximum_qos {
            dst.put_u8(prop::MAXIMUM_QOS);
            dst.put_u8(qos.value());
        }
        if let Some(v) = self.retain_available {
            dst.put_u8(prop::RETAIN_AVAILABLE);
            dst.put_u8(v as u8);
        }
        for (key, value) in &self.user_properties {
            dst.put_u8(prop::USER_PROPERTY);
            wire::write_string(key, dst)?;
            wire::write_string(value, dst)?;
        }
        if let Some(v) = self.maximum_packet_size {
            dst.put_u8(prop::MAXIMUM_PACKET_SIZE);
            dst.put_u32(v.get());
        }
        if let Some(v) = self.wildcard_subscription_available {
            dst.put_u8(prop::WILDCARD_SUB_AVAILABLE);
            dst.put_u8(v as u8);
        }
        if let Some(v) = self.subscription_id_available {
            dst.put_u8(prop::SUB_ID_AVAILABLE);
            dst.put_u8(v as u8);
        }
        if let Some(v) = self.shared_subscription_available {
            dst.put_u8(prop::SHARED_SUB_AVAILABLE);
            dst.put_u8(v as u8);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rebuild(props: &Properties) -> Properties {
        let mut buf = BytesMut::new();
        props.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), props.encoded_len());
        let mut src = buf.freeze();
        let out = Properties::decode(&mut src).unwrap();
        assert!(src.is_empty());
        out
    }

    #[test]
    fn test_empty_section() {
        let props = Properties::default();
        assert!(props.is_empty());
        assert_eq!(props.encoded_len(), 1);
        assert_eq!(rebuild(&props), props);
    }

    #[test]
    fn test_populated_section() {
        let props = Properties {
            payload_format_indicator: Some(true),
            message_expiry_interval: Some(900),
            response_topic: Some(ByteString::from_static("answers/42")),
            subscription_ids: vec![NonZeroU32::new(3).unwrap(), NonZeroU32::new(180).unwrap()],
            receive_maximum: NonZeroU16::new(12),
            maximum_qos: Some(QoS::AtLeastOnce),
            // the same user-property key may repeat
            user_properties: vec![
                (ByteString::from_static("region"), ByteString::from_static("eu-1")),
                (ByteString::from_static("region"), ByteString::from_static("eu-2")),
            ],
            will_delay_interval: Some(5),
            shared_subscription_available: Some(false),
            ..Default::default()
        };
        assert_eq!(rebuild(&props), props);
    }

    #[test]
    fn test_duplicate_entry() {
        // retain-available appears twice
        let mut src = Bytes::from_static(&[0x04, 0x25, 0x01, 0x25, 0x00]);
        assert!(matches!(Properties::decode(&mut src), Err(DecodeError::DuplicateProperty)));
    }

    #[test]
    fn test_unknown_identifier() {
        let mut src = Bytes::from_static(&[0x02, 0x6f, 0x00]);
        assert!(matches!(Properties::decode(&mut src), Err(DecodeError::MalformedPacket)));
    }

    #[test]
    fn test_truncated_section() {
        // count says four bytes but only two follow
        let mut src = Bytes::from_static(&[0x04, 0x01, 0x01]);
        assert!(matches!(Properties::decode(&mut src), Err(DecodeError::InvalidLength)));
    }
}
