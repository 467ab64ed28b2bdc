//! Transcription requests

use std::collections::BTreeMap;
use std::time::Duration;

use scribeflow_common::option_duration_millis;
use serde::{Deserialize, Serialize};

/// What the caller wants transcribed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    pub display_name: String,
    /// BCP-47 locale, e.g. `en-US`
    pub locale: String,
    /// Audio locations readable by the remote service
    pub content_urls: Vec<String>,
    /// Length of the audio when known; drives progress estimation.
    #[serde(default, with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub expected_duration: Option<Duration>,
    /// Service-specific options passed through untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl TranscriptionRequest {
    /// Request with default options.
    pub fn new<N: Into<String>, L: Into<String>>(display_name: N, locale: L, content_urls: Vec<String>) -> Self {
        Self {
            display_name: display_name.into(),
            locale: locale.into(),
            content_urls,
            expected_duration: None,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_expected_duration(mut self, duration: Duration) -> Self {
        self.expected_duration = Some(duration);
        self
    }

    #[must_use]
    pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
