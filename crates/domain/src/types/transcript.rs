//! Transcription results
//!
//! Two shapes live here: the raw time-coded recognition document as the
//! remote service writes it (offsets in 100ns ticks, n-best alternatives),
//! and the normalized [`TranscriptionResult`] handed to callers.

use std::time::Duration;

use scribeflow_common::duration_millis;
use serde::{Deserialize, Serialize};

use crate::constants::TICKS_PER_MILLISECOND;

/* -------------------------------------------------------------------------- */
/* Normalized output */
/* -------------------------------------------------------------------------- */

/// Timing of a single recognized word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    #[serde(with = "duration_millis")]
    pub start: Duration,
    #[serde(with = "duration_millis")]
    pub end: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// One recognized phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    #[serde(with = "duration_millis")]
    pub start: Duration,
    #[serde(with = "duration_millis")]
    pub end: Duration,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<WordTiming>,
}

impl TranscriptSegment {
    /// Length of the segment.
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Aggregates for one diarized speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerStatistics {
    pub speaker: u32,
    pub segment_count: usize,
    #[serde(with = "duration_millis")]
    pub speaking_time: Duration,
    pub mean_confidence: f64,
}

/// Normalized transcript of a completed job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Segment texts joined with single spaces
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    /// Present only when the transcript carried speaker labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub speakers: Vec<SpeakerStatistics>,
    /// Mean confidence of the included segments (0 when none)
    pub confidence: f64,
    /// Audio duration reported by the service
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Segments removed by the confidence filter
    pub dropped_segments: usize,
    /// Name of the result file this was built from
    pub source_file: String,
}

/* -------------------------------------------------------------------------- */
/* Raw recognition document */
/* -------------------------------------------------------------------------- */

/// Raw transcript document as downloaded from the service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTranscript {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub duration_in_ticks: u64,
    #[serde(default)]
    pub recognized_phrases: Vec<RawPhrase>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPhrase {
    #[serde(default)]
    pub recognition_status: Option<String>,
    #[serde(default)]
    pub channel: u32,
    #[serde(default)]
    pub speaker: Option<u32>,
    pub offset_in_ticks: u64,
    pub duration_in_ticks: u64,
    #[serde(default)]
    pub n_best: Vec<RawAlternative>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAlternative {
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub lexical: String,
    #[serde(default)]
    pub words: Vec<RawWord>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWord {
    pub word: String,
    pub offset_in_ticks: u64,
    pub duration_in_ticks: u64,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Convert service ticks (100ns) to a `Duration` with millisecond precision.
pub fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_millis(ticks / TICKS_PER_MILLISECOND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_duration() {
        assert_eq!(ticks_to_duration(10_000_000), Duration::from_secs(1));
        assert_eq!(ticks_to_duration(15_000), Duration::from_millis(1));
        assert_eq!(ticks_to_duration(0), Duration::ZERO);
    }

    #[test]
    fn test_raw_document_parses_service_shape() {
        let json = r#"{
            "durationInTicks": 20000000,
            "recognizedPhrases": [{
                "recognitionStatus": "Success",
                "speaker": 1,
                "offsetInTicks": 0,
                "durationInTicks": 10000000,
                "nBest": [{
                    "confidence": 0.93,
                    "display": "Hello there.",
                    "words": [{"word": "hello", "offsetInTicks": 0, "durationInTicks": 4000000}]
                }]
            }]
        }"#;
        let raw: RawTranscript = serde_json::from_str(json).unwrap();
        assert_eq!(raw.recognized_phrases.len(), 1);
        let phrase = &raw.recognized_phrases[0];
        assert_eq!(phrase.speaker, Some(1));
        assert_eq!(phrase.n_best[0].display, "Hello there.");
        assert_eq!(phrase.n_best[0].words[0].confidence, None);
    }
}
