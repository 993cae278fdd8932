//! Trailing JSON metadata document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Body of the `META_DATA` packet appended when a file is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraceMetadata {
    /// Sequence indices of packets synthesized by the capture layer (the trim
    /// baseline), so replay can tell them apart from observed calls.
    #[serde(rename = "injectedCalls")]
    pub injected_calls: Vec<u64>,

    /// Per-device feature names observed in capability-bearing create calls,
    /// keyed by the device handle rendered as `0x…`.
    #[serde(rename = "deviceFeatures", skip_serializing_if = "Option::is_none")]
    pub device_features: Option<BTreeMap<String, Vec<String>>>,
}

impl TraceMetadata {
    pub fn device_key(handle: u64) -> String {
        format!("{handle:#x}")
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_with_features() {
        let mut features = BTreeMap::new();
        features.insert(
            TraceMetadata::device_key(0xdead_beef),
            vec!["samplerAnisotropy".to_owned(), "wideLines".to_owned()],
        );
        let meta = TraceMetadata {
            injected_calls: vec![3, 4, 5],
            device_features: Some(features),
        };
        let json = meta.to_json().unwrap();
        assert_eq!(TraceMetadata::from_json(&json).unwrap(), meta);
        let text = String::from_utf8(json).unwrap();
        assert!(text.contains("\"injectedCalls\""));
        assert!(text.contains("\"0xdeadbeef\""));
    }

    #[test]
    fn features_omitted_when_absent() {
        let meta = TraceMetadata {
            injected_calls: vec![],
            device_features: None,
        };
        let text = String::from_utf8(meta.to_json().unwrap()).unwrap();
        assert!(!text.contains("deviceFeatures"));
    }
}
