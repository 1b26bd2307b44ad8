use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;
use tracing_subscriber::EnvFilter;

use eventgate::config::{EventgateConfig, LoggingConfig};
use eventgate::demo::{run_session, spawn_line_reader, Editor, EditorEvent, SessionEnd};

/// How often to check whether the throttles have drained after input ends.
const SETTLE_POLL: Duration = Duration::from_millis(25);

/// Throttled text-editor demo: every stdin line is one keystroke.
#[derive(Parser, Debug)]
#[command(name = "eventgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stats refresh interval in milliseconds
    #[arg(long, allow_negative_numbers = true)]
    stats_interval_ms: Option<f64>,

    /// Idle delay before formatting, in milliseconds
    #[arg(long, allow_negative_numbers = true)]
    format_interval_ms: Option<f64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, config: &mut EventgateConfig) {
        if let Some(ms) = self.stats_interval_ms {
            config.stats.interval_ms = Some(ms);
        }
        if let Some(ms) = self.format_interval_ms {
            config.format.interval_ms = Some(ms);
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = EventgateConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    init_tracing(&config.logging);

    info!("Starting Eventgate editor demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let (tx, mut rx) = unbounded_channel();
    let editor = Editor::new(&config.stats, &config.format, tx)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                EditorEvent::Stats { seq, stats } => println!("[stats  #{seq}] {stats}"),
                EditorEvent::Formatted { seq, passes } => {
                    println!("[format #{seq}] idle again (pass {passes})")
                }
            }
        }
    });

    let input = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
    let end = run_session(
        &editor,
        UnboundedReceiverStream::new(input),
        shutdown_signal(),
        SETTLE_POLL,
    )
    .await?;
    if end == SessionEnd::Interrupted {
        info!("Pending updates dropped");
    }

    let stats = editor.latest_stats();
    drop(editor);
    printer.await?;

    info!(words = stats.words, chars = stats.chars, "Eventgate editor demo stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
