//! Import progress reporting.
//!
//! Reports observable progress during `kg import` so users see what is
//! being discovered, parsed, and written. Progress is emitted on **stderr**
//! so stdout remains parseable for scripts. Reporting is an out-of-band
//! side effect and never influences pipeline results.

use std::io::Write;

/// A single progress event during an import run.
#[derive(Clone, Debug)]
pub enum ImportProgressEvent {
    /// A pipeline stage started (no counts yet).
    Stage { name: &'static str },
    /// A counted step within the current stage.
    Step {
        name: &'static str,
        n: u64,
        total: u64,
    },
}

/// Reports import progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ImportProgressEvent);
}

/// Human-friendly progress: "import  parsing  12 / 40 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ImportProgressEvent) {
        let line = match &event {
            ImportProgressEvent::Stage { name } => format!("import  {}...\n", name),
            ImportProgressEvent::Step { name, n, total } => {
                format!("import  {}  {} / {}\n", name, n, total)
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ImportProgressEvent) {
        let obj = match &event {
            ImportProgressEvent::Stage { name } => serde_json::json!({
                "event": "progress",
                "stage": name,
            }),
            ImportProgressEvent::Step { name, n, total } => serde_json::json!({
                "event": "progress",
                "stage": name,
                "n": n,
                "total": total,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ImportProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
