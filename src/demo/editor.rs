//! A text editor that throttles keystroke handling.
//!
//! Every keystroke feeds two throttles. The stats throttle refreshes the
//! word and character counts at most every 500 ms by default; the format
//! throttle suppresses interior dispatches and marks the editor idle again
//! once a burst of typing has drained.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use super::stats::TextStats;
use crate::error::Result;
use crate::throttle::{Throttle, ThrottleConfig, ThrottleOptions};

/// Default stats refresh interval.
pub const STATS_INTERVAL: Duration = Duration::from_millis(500);
/// Default idle delay before formatting.
pub const FORMAT_INTERVAL: Duration = Duration::from_millis(1500);

/// One keystroke as seen by the throttles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keystroke {
    /// Position of this keystroke in the input sequence, starting at 1
    pub seq: u64,
}

/// Updates published by the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// Counts were refreshed
    Stats { seq: u64, stats: TextStats },
    /// Typing paused and the document was formatted
    Formatted { seq: u64, passes: u64 },
}

#[derive(Debug, Default)]
struct Document {
    text: String,
    idle: bool,
    latest: TextStats,
    format_passes: u64,
    keystrokes: u64,
}

/// Defaults for the stats throttle.
pub fn stats_defaults() -> ThrottleConfig {
    ThrottleConfig {
        interval: STATS_INTERVAL,
        suppress_non_final: false,
        name: Some("stats".to_string()),
    }
}

/// Defaults for the format throttle.
pub fn format_defaults() -> ThrottleConfig {
    ThrottleConfig {
        interval: FORMAT_INTERVAL,
        suppress_non_final: true,
        name: Some("format".to_string()),
    }
}

/// Text buffer wired to a stats throttle and a format throttle.
pub struct Editor {
    document: Arc<Mutex<Document>>,
    stats: Throttle<Keystroke>,
    format: Throttle<Keystroke>,
}

impl Editor {
    /// Create an editor. Updates are sent on `events`.
    pub fn new(
        stats: &ThrottleOptions,
        format: &ThrottleOptions,
        events: UnboundedSender<EditorEvent>,
    ) -> Result<Self> {
        let document = Arc::new(Mutex::new(Document {
            idle: true,
            ..Document::default()
        }));

        let stats_throttle = {
            let document = Arc::clone(&document);
            let events = events.clone();
            Throttle::<Keystroke, ()>::new(
                move |_: &Throttle<Keystroke>, key: Keystroke, _: ()| {
                    let stats = {
                        let mut doc = document.lock();
                        doc.latest = TextStats::of(&doc.text);
                        doc.latest
                    };
                    debug!(seq = key.seq, words = stats.words, chars = stats.chars, "Stats refreshed");
                    publish(&events, EditorEvent::Stats { seq: key.seq, stats });
                },
                stats.resolve_with(&stats_defaults()),
            )?
        };

        let format_throttle = {
            let document = Arc::clone(&document);
            Throttle::<Keystroke, ()>::new(
                move |_: &Throttle<Keystroke>, key: Keystroke, _: ()| {
                    let passes = {
                        let mut doc = document.lock();
                        doc.idle = true;
                        doc.format_passes += 1;
                        doc.format_passes
                    };
                    debug!(seq = key.seq, passes, "Document formatted");
                    publish(&events, EditorEvent::Formatted { seq: key.seq, passes });
                },
                format.resolve_with(&format_defaults()),
            )?
        };

        info!(
            stats_ms = stats_throttle.interval().as_millis() as u64,
            format_ms = format_throttle.interval().as_millis() as u64,
            "Editor ready"
        );

        Ok(Self {
            document,
            stats: stats_throttle,
            format: format_throttle,
        })
    }

    /// A key went down: the editor is no longer idle.
    pub fn key_down(&self) {
        let mut doc = self.document.lock();
        if doc.idle {
            doc.idle = false;
        }
    }

    /// A key came up with `input`: append it and notify both throttles.
    pub fn key_up(&self, input: &str) {
        let key = {
            let mut doc = self.document.lock();
            doc.text.push_str(input);
            doc.keystrokes += 1;
            Keystroke { seq: doc.keystrokes }
        };

        self.stats.register(key.clone());
        self.format.register(key);
    }

    /// Press and release a key in one go.
    pub fn type_input(&self, input: &str) {
        self.key_down();
        self.key_up(input);
    }

    /// Counts from the most recent stats refresh.
    pub fn latest_stats(&self) -> TextStats {
        self.document.lock().latest
    }

    /// Whether the format throttle has caught up with typing.
    pub fn is_idle(&self) -> bool {
        self.document.lock().idle
    }

    /// How many times the document was formatted.
    pub fn format_passes(&self) -> u64 {
        self.document.lock().format_passes
    }

    /// Current document text.
    pub fn text(&self) -> String {
        self.document.lock().text.clone()
    }

    /// Whether both throttles have drained.
    pub fn is_settled(&self) -> bool {
        !self.stats.is_throttling() && !self.format.is_throttling()
    }

    /// Drop any pending updates.
    pub fn flush(&self) {
        self.stats.flush();
        self.format.flush();
    }

    /// The stats throttle.
    pub fn stats_throttle(&self) -> &Throttle<Keystroke> {
        &self.stats
    }

    /// The format throttle.
    pub fn format_throttle(&self) -> &Throttle<Keystroke> {
        &self.format
    }
}

fn publish(events: &UnboundedSender<EditorEvent>, event: EditorEvent) {
    if events.send(event).is_err() {
        debug!("Editor event receiver dropped");
    }
}
