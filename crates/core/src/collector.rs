//! Result collection and transcript normalization
//!
//! Once a remote job succeeds, the collector lists its artifacts, picks the
//! transcription document, enforces the size limit (before and after the
//! download), parses it and normalizes it into a [`TranscriptionResult`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use scribeflow_common::{Clock, ServiceError, SystemClock};
use scribeflow_domain::constants::TARGET_RESULTS;
use scribeflow_domain::{
    ticks_to_duration, CollectorConfig, JobPriority, RawPhrase, RawTranscript, ResultFile,
    ResultFileKind, SpeakerStatistics, TranscriptSegment, TranscriptionResult, WordTiming,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::guard::ServiceGuard;
use crate::ports::ResultFetcher;

/// Recognition status of phrases that carry usable text.
const RECOGNITION_SUCCESS: &str = "Success";

/// Downloads and normalizes transcription results.
pub struct ResultCollector<C: Clock + Clone = SystemClock> {
    config: CollectorConfig,
    fetcher: Arc<dyn ResultFetcher>,
    guard: Arc<ServiceGuard<C>>,
}

impl<C: Clock + Clone> ResultCollector<C> {
    /// Collector downloading through `fetcher` under `guard`.
    pub fn new(config: CollectorConfig, fetcher: Arc<dyn ResultFetcher>, guard: Arc<ServiceGuard<C>>) -> Self {
        Self { config, fetcher, guard }
    }

    /// Fetch and normalize the transcript of a succeeded remote job.
    #[instrument(skip(self, cancel))]
    pub async fn collect(
        &self,
        external_id: &str,
        priority: JobPriority,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionResult, ServiceError> {
        let admission = priority.admission();

        let files = self
            .guard
            .call(TARGET_RESULTS, admission, cancel, |credentials| async move {
                self.fetcher.list_result_files(external_id, &credentials).await
            })
            .await?;

        let file = select_transcription(&files).ok_or_else(|| {
            ServiceError::malformed(format!("no transcription file among {} result files", files.len()))
        })?;
        self.check_size(file.size)?;

        let bytes = self
            .guard
            .call(TARGET_RESULTS, admission, cancel, |credentials| async move {
                self.fetcher.download_file(file, &credentials).await
            })
            .await?;
        self.check_size(bytes.len() as u64)?;

        let raw: RawTranscript = serde_json::from_slice(&bytes)
            .map_err(|e| ServiceError::malformed(format!("{}: {e}", file.name)))?;

        let result = normalize(raw, &self.config, &file.name);
        info!(
            file = %file.name,
            segments = result.segments.len(),
            dropped = result.dropped_segments,
            confidence = result.confidence,
            "Collected transcription result"
        );
        Ok(result)
    }

    fn check_size(&self, size: u64) -> Result<(), ServiceError> {
        if size > self.config.max_result_bytes {
            Err(ServiceError::ResultTooLarge { size, max: self.config.max_result_bytes })
        } else {
            Ok(())
        }
    }
}

/// The transcription document among a job's artifacts, preferring files
/// not named like reports.
fn select_transcription(files: &[ResultFile]) -> Option<&ResultFile> {
    let mut candidates = files.iter().filter(|f| f.kind == ResultFileKind::Transcription);
    let first = candidates.clone().next();
    candidates.find(|f| !f.name.to_ascii_lowercase().contains("report")).or(first)
}

/// Normalize a raw recognition document.
///
/// Phrases that were not recognized successfully or carry no text are
/// skipped; phrases below `min_confidence` are dropped and counted.
pub fn normalize(raw: RawTranscript, config: &CollectorConfig, source_file: &str) -> TranscriptionResult {
    let mut segments = Vec::with_capacity(raw.recognized_phrases.len());
    let mut dropped_segments = 0;

    for phrase in raw.recognized_phrases {
        match to_segment(phrase, config) {
            Some(segment) if segment.confidence < config.min_confidence => dropped_segments += 1,
            Some(segment) => segments.push(segment),
            None => {}
        }
    }
    segments.sort_by_key(|s| s.start);

    let confidence = if segments.is_empty() {
        0.0
    } else {
        segments.iter().map(|s| s.confidence).sum::<f64>() / segments.len() as f64
    };
    let text = segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
    let duration = match ticks_to_duration(raw.duration_in_ticks) {
        d if d.is_zero() => segments.iter().map(|s| s.end).max().unwrap_or_default(),
        d => d,
    };
    let speakers = speaker_statistics(&segments);

    debug!(segments = segments.len(), dropped_segments, speakers = speakers.len(), "Normalized transcript");

    TranscriptionResult {
        text,
        segments,
        speakers,
        confidence,
        duration,
        dropped_segments,
        source_file: source_file.to_string(),
    }
}

fn to_segment(phrase: RawPhrase, config: &CollectorConfig) -> Option<TranscriptSegment> {
    if phrase.recognition_status.as_deref().is_some_and(|s| s != RECOGNITION_SUCCESS) {
        return None;
    }
    let best = phrase.n_best.into_iter().next()?;
    let text = best.display.trim().to_string();
    if text.is_empty() {
        return None;
    }

    let start = ticks_to_duration(phrase.offset_in_ticks);
    let words = if config.include_word_timings {
        best.words
            .into_iter()
            .map(|w| {
                let start = ticks_to_duration(w.offset_in_ticks);
                WordTiming {
                    word: w.word,
                    start,
                    end: start + ticks_to_duration(w.duration_in_ticks),
                    confidence: w.confidence,
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    Some(TranscriptSegment {
        text,
        start,
        end: start + ticks_to_duration(phrase.duration_in_ticks),
        confidence: best.confidence,
        speaker: phrase.speaker,
        words,
    })
}

fn speaker_statistics(segments: &[TranscriptSegment]) -> Vec<SpeakerStatistics> {
    let mut by_speaker: BTreeMap<u32, (usize, Duration, f64)> = BTreeMap::new();
    for segment in segments {
        if let Some(speaker) = segment.speaker {
            let entry = by_speaker.entry(speaker).or_insert((0, Duration::ZERO, 0.0));
            entry.0 += 1;
            entry.1 += segment.duration();
            entry.2 += segment.confidence;
        }
    }

    by_speaker
        .into_iter()
        .map(|(speaker, (segment_count, speaking_time, confidence_sum))| SpeakerStatistics {
            speaker,
            segment_count,
            speaking_time,
            mean_confidence: confidence_sum / segment_count as f64,
        })
        .collect()
}
