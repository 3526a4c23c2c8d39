// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: listener  —  live build feedback
// ─────────────────────────────────────────────────────────────────────────────

use std::path::Path;
use std::sync::Mutex;

/// Receives progress and tool output while a build runs.
///
/// `output` is called from the stream-draining threads of the process
/// runner, so implementations must be `Sync`.
pub trait BuildListener: Sync {
    /// Overall progress, 0–100, monotonically increasing within one build.
    fn progress(&self, _percent: u8) {}

    /// A command line about to run (verbose builds only).
    fn command(&self, _argv: &[String]) {}

    /// One line of tool output, after path stripping and hint rewriting.
    fn output(&self, _line: &str) {}

    /// A source was skipped because its object is up to date (verbose builds only).
    fn reused(&self, _object: &Path) {}
}

/// Discards everything.
pub struct Silent;

impl BuildListener for Silent {}

/// Records every callback; handy for tests and for embedding callers
/// that want the full log after the build.
#[derive(Debug, Default)]
pub struct Transcript {
    pub progress: Mutex<Vec<u8>>,
    pub commands: Mutex<Vec<Vec<String>>>,
    pub lines:    Mutex<Vec<String>>,
    pub reused:   Mutex<Vec<std::path::PathBuf>>,
}

impl Transcript {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn percentages(&self) -> Vec<u8> {
        self.progress.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl BuildListener for Transcript {
    fn progress(&self, percent: u8) {
        if let Ok(mut p) = self.progress.lock() { p.push(percent); }
    }

    fn command(&self, argv: &[String]) {
        if let Ok(mut c) = self.commands.lock() { c.push(argv.to_vec()); }
    }

    fn output(&self, line: &str) {
        if let Ok(mut l) = self.lines.lock() { l.push(line.to_owned()); }
    }

    fn reused(&self, object: &Path) {
        if let Ok(mut r) = self.reused.lock() { r.push(object.to_owned()); }
    }
}
