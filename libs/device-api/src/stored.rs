use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::{DeviceData, DeviceError, TelemetryRecord};

/// Persisted form of a telemetry record.
///
/// Не используется в runtime publisher'ов и subscriber'а: описывает,
/// как запись выглядела бы в хранилище. `device_data` хранится как
/// заранее закодированный JSON blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub time: DateTime<Utc>,
    pub device_id: String,
    pub device_type: String,
    pub device_data: Box<RawValue>,
}

impl StoredRecord {
    pub fn from_record(id: u64, record: &TelemetryRecord, at: DateTime<Utc>) -> Result<Self, DeviceError> {
        let device_data = serde_json::value::to_raw_value(&record.device_data).map_err(DeviceError::Encode)?;
        Ok(Self {
            id,
            created_at: at,
            updated_at: at,
            time: record.time,
            device_id: record.device_id.clone(),
            device_type: record.device_type().to_string(),
            device_data,
        })
    }

    /// Decode the opaque blob back into a typed record.
    pub fn to_record(&self) -> Result<TelemetryRecord, DeviceError> {
        let raw: serde_json::Value = serde_json::from_str(self.device_data.get()).map_err(DeviceError::Decode)?;
        Ok(TelemetryRecord {
            time: self.time,
            device_id: self.device_id.clone(),
            device_data: DeviceData::from_parts(self.device_type.clone(), raw)?,
        })
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// Monotonic id source for [`StoredRecord::id`], starting at 1.
#[derive(Debug)]
pub struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}
