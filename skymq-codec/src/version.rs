use serde::{Deserialize, Serialize};

use crate::types::{MQTT_LEVEL_311, MQTT_LEVEL_5};

/// Supported MQTT protocol generations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum ProtocolVersion {
    /// MQTT version 3.1.1
    #[default]
    V311,
    /// MQTT version 5.0
    V5,
}

impl ProtocolVersion {
    /// Protocol level byte carried in the Connect packet.
    #[inline]
    pub fn level(self) -> u8 {
        match self {
            ProtocolVersion::V311 => MQTT_LEVEL_311,
            ProtocolVersion::V5 => MQTT_LEVEL_5,
        }
    }
}
