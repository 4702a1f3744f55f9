use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DeviceError;

/// `device_type` of the wrist bracelet.
pub const BRACELET: &str = "bracelet";

// ════════════════════════════════════════════════════════════════
//  Device payloads
// ════════════════════════════════════════════════════════════════

/// Показания браслета.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BraceletData {
    pub heart_rate: u32,
}

/// Payload устройства, тегированный по `device_type`.
///
/// `device_type` и `device_data` на проводе лежат рядом, поэтому
/// тип хранится здесь, а не в `TelemetryRecord`: запись не может
/// объявить один тип и нести payload другого.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceData {
    Bracelet(BraceletData),
    /// Тип, неизвестный этой сборке. Сохраняется как есть при decode.
    Unknown {
        device_type: String,
        raw: serde_json::Value,
    },
}

impl DeviceData {
    pub fn device_type(&self) -> &str {
        match self {
            DeviceData::Bracelet(_) => BRACELET,
            DeviceData::Unknown { device_type, .. } => device_type,
        }
    }

    /// Rebuild a payload from its wire parts.
    pub fn from_parts(device_type: String, raw: serde_json::Value) -> Result<Self, DeviceError> {
        match device_type.as_str() {
            BRACELET => serde_json::from_value(raw)
                .map(DeviceData::Bracelet)
                .map_err(|source| DeviceError::Payload { device_type, source }),
            _ => Ok(DeviceData::Unknown { device_type, raw }),
        }
    }
}

impl Serialize for DeviceData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DeviceData::Bracelet(data) => data.serialize(serializer),
            DeviceData::Unknown { raw, .. } => raw.serialize(serializer),
        }
    }
}

impl fmt::Display for DeviceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceData::Bracelet(data) => write!(f, "heart_rate={}", data.heart_rate),
            DeviceData::Unknown { raw, .. } => write!(f, "{raw}"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  TelemetryRecord
// ════════════════════════════════════════════════════════════════

/// One synthetic reading, as published on the telemetry topic.
///
/// Wire form:
/// `{"time":"<RFC3339>","device_id":"..","device_type":"..","device_data":{..}}`
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    /// Момент генерации записи.
    pub time: DateTime<Utc>,
    pub device_id: String,
    pub device_data: DeviceData,
}

impl TelemetryRecord {
    /// Record stamped with the current wall-clock time.
    pub fn new(device_id: impl Into<String>, device_data: DeviceData) -> Self {
        Self::at(Utc::now(), device_id, device_data)
    }

    pub fn at(time: DateTime<Utc>, device_id: impl Into<String>, device_data: DeviceData) -> Self {
        Self {
            time,
            device_id: device_id.into(),
            device_data,
        }
    }

    pub fn device_type(&self) -> &str {
        self.device_data.device_type()
    }

    /// Serialize to JSON wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, DeviceError> {
        serde_json::to_vec(self).map_err(DeviceError::Encode)
    }

    /// Parse JSON wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DeviceError> {
        let wire: WireRecord = serde_json::from_slice(bytes).map_err(DeviceError::Decode)?;
        wire.into_record()
    }
}

impl Serialize for TelemetryRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("TelemetryRecord", 4)?;
        s.serialize_field("time", &self.time)?;
        s.serialize_field("device_id", &self.device_id)?;
        s.serialize_field("device_type", self.device_type())?;
        s.serialize_field("device_data", &self.device_data)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for TelemetryRecord {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        WireRecord::deserialize(deserializer)?
            .into_record()
            .map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{time: {}, device_id: {}, device_type: {}, device_data: {}}}",
            self.time.to_rfc3339(),
            self.device_id,
            self.device_type(),
            self.device_data
        )
    }
}

#[derive(Deserialize)]
struct WireRecord {
    time: DateTime<Utc>,
    device_id: String,
    device_type: String,
    device_data: serde_json::Value,
}

impl WireRecord {
    fn into_record(self) -> Result<TelemetryRecord, DeviceError> {
        Ok(TelemetryRecord {
            time: self.time,
            device_id: self.device_id,
            device_data: DeviceData::from_parts(self.device_type, self.device_data)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bracelet(heart_rate: u32) -> TelemetryRecord {
        TelemetryRecord::new("bracelet-123", DeviceData::Bracelet(BraceletData { heart_rate }))
    }

    #[test]
    fn encodes_expected_field_names() {
        let bytes = bracelet(72).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, ["device_data", "device_id", "device_type", "time"]);
        assert_eq!(obj["device_id"], "bracelet-123");
        assert_eq!(obj["device_type"], "bracelet");
        assert_eq!(obj["device_data"], serde_json::json!({ "heart_rate": 72 }));
    }

    #[test]
    fn time_is_rfc3339_with_subseconds() {
        let record = bracelet(60);
        let value: serde_json::Value = serde_json::from_slice(&record.encode().unwrap()).unwrap();
        let text = value["time"].as_str().unwrap();

        let parsed = DateTime::parse_from_rfc3339(text).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), record.time);
    }

    #[test]
    fn decode_restores_bracelet() {
        let record = bracelet(99);
        let decoded = TelemetryRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn unknown_device_type_is_preserved() {
        let wire = br#"{"time":"2024-05-01T10:00:00.5Z","device_id":"t-1","device_type":"thermostat","device_data":{"celsius":21.5,"mode":"eco"}}"#;
        let record = TelemetryRecord::decode(wire).unwrap();

        assert_eq!(record.device_type(), "thermostat");
        match &record.device_data {
            DeviceData::Unknown { raw, .. } => assert_eq!(raw["mode"], "eco"),
            other => panic!("expected Unknown, got {other:?}"),
        }

        let again: serde_json::Value = serde_json::from_slice(&record.encode().unwrap()).unwrap();
        assert_eq!(again["device_data"]["celsius"], 21.5);
    }

    #[test]
    fn bracelet_with_wrong_shape_is_rejected() {
        let wire = br#"{"time":"2024-05-01T10:00:00Z","device_id":"b","device_type":"bracelet","device_data":{"steps":10}}"#;
        let err = TelemetryRecord::decode(wire).unwrap_err();
        assert!(matches!(err, DeviceError::Payload { ref device_type, .. } if device_type == "bracelet"));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            TelemetryRecord::decode(b"Hello, World!"),
            Err(DeviceError::Decode(_))
        ));
    }

    #[test]
    fn display_summarises_record() {
        let text = bracelet(81).to_string();
        assert!(text.contains("device_id: bracelet-123"));
        assert!(text.contains("heart_rate=81"));
    }
}
