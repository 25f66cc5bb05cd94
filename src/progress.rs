//! Refresh progress reporting.
//!
//! Reports observable progress during `shelf refresh` so users see which book
//! is being looked up, how many are left, and any notices along the way.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a refresh pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshProgressEvent {
    /// Number of records the pass will walk.
    Total { total: u64 },
    /// What is happening now; `None` clears the status line.
    Status { message: Option<String> },
    /// Records visited so far.
    Count { n: u64 },
    /// Something the user should see even when not watching progress.
    Notice { message: String },
}

/// Reports refresh progress. Implementations write to stderr (human or JSON).
pub trait RefreshProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the refresh loop.
    fn report(&self, event: RefreshProgressEvent);
}

/// Human-friendly progress on stderr: "refresh  12 / 340 books  Dune".
#[derive(Default)]
pub struct StderrProgress {
    state: std::sync::Mutex<HumanState>,
}

#[derive(Default)]
struct HumanState {
    total: u64,
    status: Option<String>,
}

impl RefreshProgressReporter for StderrProgress {
    fn report(&self, event: RefreshProgressEvent) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let line = match event {
            RefreshProgressEvent::Total { total } => {
                state.total = total;
                return;
            }
            RefreshProgressEvent::Status { message } => {
                state.status = message;
                return;
            }
            RefreshProgressEvent::Count { n } => format!(
                "refresh  {} / {} books  {}\n",
                format_number(n),
                format_number(state.total),
                state.status.as_deref().unwrap_or("")
            ),
            RefreshProgressEvent::Notice { message } => format!("{}\n", message),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RefreshProgressReporter for JsonProgress {
    fn report(&self, event: RefreshProgressEvent) {
        let obj = match &event {
            RefreshProgressEvent::Total { total } => serde_json::json!({
                "event": "total",
                "total": total
            }),
            RefreshProgressEvent::Status { message } => serde_json::json!({
                "event": "status",
                "message": message
            }),
            RefreshProgressEvent::Count { n } => serde_json::json!({
                "event": "progress",
                "n": n
            }),
            RefreshProgressEvent::Notice { message } => serde_json::json!({
                "event": "notice",
                "message": message
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RefreshProgressReporter for NoProgress {
    fn report(&self, _event: RefreshProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn RefreshProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress::default()),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
