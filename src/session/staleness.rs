//! Per-document watermarks and the reload decision.
//!
//! A watermark is the time at which the session last knew the document to
//! match the remote copy. Loading stamps "now"; saving stamps "now plus the
//! propagation delay" so our own write does not look like a remote change once
//! the remote mtime catches up.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;

use super::DocumentId;

/// Typed state kept for every open document.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DocumentState {
    pub watermark: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct StalenessTracker {
    enabled: bool,
    propagation_delay: f64,
    documents: HashMap<DocumentId, DocumentState>,
}

impl StalenessTracker {
    pub fn new(enabled: bool, propagation_delay: f64) -> Self {
        Self {
            enabled,
            propagation_delay: propagation_delay.max(0.0),
            documents: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.reload_on_remote_change, config.propagation_delay)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pause before reloading, letting an in-flight remote write settle.
    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs_f64(self.propagation_delay)
    }

    pub fn stamp_loaded(&mut self, doc: DocumentId, now: f64) {
        self.documents.entry(doc).or_default().watermark = Some(now);
    }

    pub fn stamp_saved(&mut self, doc: DocumentId, now: f64) {
        self.documents.entry(doc).or_default().watermark = Some(now + self.propagation_delay);
    }

    /// Start tracking `doc` without a watermark if it is not tracked yet.
    pub fn track(&mut self, doc: DocumentId) {
        self.documents.entry(doc).or_default();
    }

    pub fn forget(&mut self, doc: DocumentId) {
        self.documents.remove(&doc);
    }

    pub fn is_tracked(&self, doc: DocumentId) -> bool {
        self.documents.contains_key(&doc)
    }

    pub fn state(&self, doc: DocumentId) -> Option<DocumentState> {
        self.documents.get(&doc).copied()
    }

    pub fn watermark(&self, doc: DocumentId) -> Option<f64> {
        self.documents.get(&doc).and_then(|s| s.watermark)
    }

    /// A tracked document needs a reload when it has no watermark or the remote
    /// copy is strictly newer. Never writes the watermark.
    pub fn needs_reload(&self, doc: DocumentId, remote_mtime: f64) -> bool {
        match self.documents.get(&doc) {
            None => false,
            Some(DocumentState { watermark: None }) => true,
            Some(DocumentState {
                watermark: Some(mark),
            }) => remote_mtime > *mark,
        }
    }
}

/// Parse the output of the "last touched" command as epoch seconds.
pub fn parse_mtime(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: DocumentId = DocumentId(1);

    #[test]
    fn test_no_watermark_reloads() {
        let mut tracker = StalenessTracker::new(true, 0.0);
        tracker.track(DOC);
        assert!(tracker.needs_reload(DOC, 1000.0));
    }

    #[test]
    fn test_newer_watermark_does_not_reload() {
        let mut tracker = StalenessTracker::new(true, 0.0);
        tracker.stamp_loaded(DOC, 2000.0);
        assert!(!tracker.needs_reload(DOC, 1500.0));
        assert!(!tracker.needs_reload(DOC, 2000.0));
        assert!(tracker.needs_reload(DOC, 2000.5));
    }

    #[test]
    fn test_save_stamps_into_the_future() {
        let mut tracker = StalenessTracker::new(true, 2.0);
        tracker.stamp_saved(DOC, 100.0);
        assert_eq!(tracker.watermark(DOC), Some(102.0));
        // Remote write-back from our own save lands inside the window.
        assert!(!tracker.needs_reload(DOC, 101.0));
    }

    #[test]
    fn test_comparison_does_not_write() {
        let mut tracker = StalenessTracker::new(true, 0.0);
        tracker.stamp_loaded(DOC, 10.0);
        assert!(tracker.needs_reload(DOC, 20.0));
        assert_eq!(tracker.watermark(DOC), Some(10.0));
    }

    #[test]
    fn test_untracked_document_never_reloads() {
        let mut tracker = StalenessTracker::new(true, 0.0);
        assert!(!tracker.needs_reload(DOC, 1.0));
        tracker.stamp_loaded(DOC, 0.0);
        tracker.forget(DOC);
        assert!(!tracker.is_tracked(DOC));
        assert!(!tracker.needs_reload(DOC, 1.0));
    }

    #[test]
    fn test_track_keeps_existing_watermark() {
        let mut tracker = StalenessTracker::new(true, 0.0);
        tracker.stamp_loaded(DOC, 5.0);
        tracker.track(DOC);
        assert_eq!(tracker.state(DOC), Some(DocumentState { watermark: Some(5.0) }));
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            reload_on_remote_change: true,
            propagation_delay: 1.5,
            ..Config::default()
        };
        let tracker = StalenessTracker::from_config(&config);
        assert!(tracker.is_enabled());
        assert_eq!(tracker.propagation_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn test_parse_mtime() {
        assert_eq!(parse_mtime("1700000000\n"), Some(1_700_000_000.0));
        assert_eq!(parse_mtime(" 12.5 "), Some(12.5));
        assert_eq!(parse_mtime(""), None);
        assert_eq!(parse_mtime("stat: cannot stat"), None);
        assert_eq!(parse_mtime("NaN"), None);
    }
}
