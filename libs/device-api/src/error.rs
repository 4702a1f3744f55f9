/// Errors raised while encoding or decoding device payloads.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Record could not be serialized. Transient for a publisher: skip the tick.
    #[error("encode: {0}")]
    Encode(#[source] serde_json::Error),

    /// Wire bytes are not a telemetry record.
    #[error("decode: {0}")]
    Decode(#[source] serde_json::Error),

    /// `device_type` is known but `device_data` does not fit its shape.
    #[error("device_data for '{device_type}': {source}")]
    Payload {
        device_type: String,
        #[source]
        source: serde_json::Error,
    },
}
