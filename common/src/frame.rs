use bytes::Bytes;

/// An encoded camera image (PNG, JPEG, BMP, ...) with capture metadata.
///
/// The MIME type is only a hint for the decoder. When it is missing or names a
/// format the decoder does not know, the format is guessed from the payload's
/// magic bytes instead.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub payload: Bytes,
    pub mime_type: Option<String>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl EncodedImage {
    /// Wrap an encoded buffer, stamping it with the current wall-clock time.
    pub fn new(payload: impl Into<Bytes>, mime_type: Option<String>) -> Self {
        Self {
            payload: payload.into(),
            mime_type,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
            seq: 0,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_captured_at(mut self, captured_at_ms: i64) -> Self {
        self.captured_at_ms = captured_at_ms;
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the size of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// MIME type with any parameters (`; charset=...`) stripped.
    pub fn essence(&self) -> Option<&str> {
        self.mime_type
            .as_deref()
            .map(|m| m.split(';').next().unwrap_or(m).trim())
            .filter(|m| !m.is_empty())
    }
}
