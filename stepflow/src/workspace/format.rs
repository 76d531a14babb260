//! Result materialization formats.

use std::fmt::Debug;

use crate::errors::WorkspaceError;

/// Serializes step results to and from stored bytes.
///
/// Re-reading a stored result must reproduce a value equivalent to the one
/// that was written.
pub trait ResultFormat: Send + Sync + Debug {
    /// Short name recorded with each stored result.
    fn name(&self) -> &str;

    /// File extension used by file-backed workspaces.
    fn extension(&self) -> &str {
        self.name()
    }

    /// Encodes a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, WorkspaceError>;

    /// Decodes a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding.
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, WorkspaceError>;
}

/// JSON result format. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat {
    pretty: bool,
}

impl JsonFormat {
    /// Creates a compact JSON format.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pretty-printing JSON format.
    #[must_use]
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl ResultFormat for JsonFormat {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, WorkspaceError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, WorkspaceError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_format_preserves_value() {
        let value = json!({"rows": [1, 2, 3], "name": "x", "score": 0.25});
        for format in [JsonFormat::new(), JsonFormat::pretty()] {
            let bytes = format.encode(&value).unwrap();
            assert_eq!(format.decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_json_format_rejects_garbage() {
        assert!(JsonFormat::new().decode(b"\xff not json").is_err());
    }
}
