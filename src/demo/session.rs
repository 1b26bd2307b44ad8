//! Feeding input lines to an [`Editor`] until input ends or shutdown.

use std::future::Future;
use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

use super::editor::Editor;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Input closed and both throttles drained
    Settled,
    /// A shutdown signal arrived; pending updates were dropped
    Interrupted,
}

/// Read lines from `reader` on a dedicated thread.
///
/// The thread is detached. A read that never returns does not keep the
/// Tokio runtime from shutting down. The channel closes at end of input or
/// after the first read error.
pub fn spawn_line_reader<R>(reader: R) -> io::Result<UnboundedReceiver<io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = unbounded_channel();

    thread::Builder::new()
        .name("eventgate-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
            debug!("Input reader finished");
        })?;

    Ok(rx)
}

/// Type every line into `editor`, then wait for its throttles to drain.
///
/// `shutdown` is watched the whole time, including while waiting for the
/// throttles. When it fires the editor is flushed and the session ends.
pub async fn run_session<S, F>(
    editor: &Editor,
    lines: S,
    shutdown: F,
    settle_poll: Duration,
) -> io::Result<SessionEnd>
where
    S: Stream<Item = io::Result<String>>,
    F: Future<Output = ()>,
{
    tokio::pin!(lines);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => editor.type_input(&format!("{line}\n")),
                Some(Err(e)) => return Err(e),
                None => break,
            },
            _ = &mut shutdown => {
                editor.flush();
                return Ok(SessionEnd::Interrupted);
            }
        }
    }

    info!("Input closed, waiting for pending updates");
    loop {
        if editor.is_settled() {
            return Ok(SessionEnd::Settled);
        }
        tokio::select! {
            _ = tokio::time::sleep(settle_poll) => {}
            _ = &mut shutdown => {
                editor.flush();
                return Ok(SessionEnd::Interrupted);
            }
        }
    }
}
