//! Text-editing demo built on two throttles.

mod editor;
mod session;
mod stats;

pub use editor::{
    format_defaults, stats_defaults, Editor, EditorEvent, Keystroke, FORMAT_INTERVAL,
    STATS_INTERVAL,
};
pub use session::{run_session, spawn_line_reader, SessionEnd};
pub use stats::{count_words, TextStats};
