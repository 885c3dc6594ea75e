//! # Remote Faults
//!
//! The serializable shape of an exception that crossed the channel. The
//! JSON field names are a wire contract shared with the counterpart
//! context; do not rename them.

use serde::Deserialize;
use serde::Serialize;

/// An exception raised by the remote function, wrapped for transport.
///
/// Distinct from the protocol's own error type: a `RemoteFault` means "the
/// remote function failed", never "the transport is broken".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    #[serde(rename = "message")]
    pub message: String,
    #[serde(rename = "stackTrace")]
    pub stack_trace: Option<String>,
    #[serde(rename = "source")]
    pub source: Option<String>,
    #[serde(rename = "originalTypeName")]
    pub original_type_name: String,
}

impl RemoteFault {
    pub fn new(message: impl Into<String>, original_type_name: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
            source: None,
            original_type_name: original_type_name.into(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Serialize to the UTF-8 JSON wire form.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialize from the UTF-8 JSON wire form.
    pub fn from_json(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.original_type_name, self.message)
    }
}

impl std::error::Error for RemoteFault {}
