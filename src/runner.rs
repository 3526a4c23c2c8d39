// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: runner  —  external tool execution
//
//  stdout and stderr are drained on two scoped threads while the calling
//  thread waits for the child, so a chatty compiler can never stall on a
//  full pipe. Every line goes through the diagnostic translator before the
//  exit status is looked at. Notification scripts are the exception: only
//  their own exit is awaited.
// ─────────────────────────────────────────────────────────────────────────────

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Sender};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::diagnostics::Translator;
use crate::error::{BuildError, Result};
use crate::listener::BuildListener;

/// How long a notification script's output is still collected after it exits.
pub const NOTIFY_GRACE: Duration = Duration::from_millis(250);

pub struct Runner<'a> {
    translator: &'a Translator<'a>,
    listener:   &'a dyn BuildListener,
    verbose:    bool,
}

impl<'a> Runner<'a> {
    pub fn new(translator: &'a Translator<'a>, listener: &'a dyn BuildListener, verbose: bool) -> Self {
        Self { translator, listener, verbose }
    }

    /// Run one build step. A promoted diagnostic outranks the exit code.
    pub fn run(&self, argv: &[String]) -> Result<()> {
        let program = program_of(argv)?;
        let code = self.exec(argv)?;

        if let Some(diagnostic) = self.translator.first_diagnostic() {
            return Err(BuildError::Compile(diagnostic));
        }
        match code {
            Some(0) => Ok(()),
            code => {
                if let Some(c) = code.filter(|c| *c > 1) {
                    warn!("{program} returned {c}");
                }
                Err(BuildError::ToolFailed { program: program.to_owned(), code })
            }
        }
    }

    /// Run the post-build notification script; its stderr is discarded.
    ///
    /// Only the script's own exit is awaited. Anything it leaves running in
    /// the background may hold stdout open, so output is forwarded from a
    /// detached reader and collected for at most [`NOTIFY_GRACE`] afterwards.
    pub fn run_notify(&self, argv: &[String]) -> Result<()> {
        let program = program_of(argv)?;
        let mut child = self.spawn(argv, Stdio::null())?;

        let (tx, rx) = mpsc::channel();
        if let Some(out) = child.stdout.take() {
            std::thread::spawn(move || forward(out, tx));
        }
        let status = wait(&mut child)?;

        let deadline = Instant::now() + NOTIFY_GRACE;
        while let Ok(line) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            self.translator.observe(&line);
        }

        debug!(%program, code = ?status.code(), "exited");
        match status.code() {
            Some(0) => Ok(()),
            code => Err(BuildError::PostCompile { program: program.to_owned(), code }),
        }
    }

    /// Spawn `argv`, drain its output, and return the exit code
    /// (`None` when the child was killed by a signal).
    pub fn exec(&self, argv: &[String]) -> Result<Option<i32>> {
        let program = program_of(argv)?;
        let mut child = self.spawn(argv, Stdio::piped())?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let status = std::thread::scope(|s| {
            if let Some(out) = stdout {
                s.spawn(move || self.drain(out));
            }
            if let Some(err) = stderr {
                s.spawn(move || self.drain(err));
            }
            wait(&mut child)
            // scope end joins both drains before the status is used
        })?;

        debug!(%program, code = ?status.code(), "exited");
        Ok(status.code())
    }

    fn spawn(&self, argv: &[String], stderr: Stdio) -> Result<Child> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BuildError::Configuration("empty command line".into()))?;

        if self.verbose {
            self.listener.command(argv);
        }
        debug!(%program, args = args.len(), "spawning");

        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .spawn()
            .map_err(|source| BuildError::ToolInvocation { program: program.clone(), source })
    }

    fn drain(&self, stream: impl Read) {
        read_lines(stream, |line| {
            self.translator.observe(line);
            true
        });
    }
}

/// Send each line of `stream` until it closes or the receiver is gone.
fn forward(stream: impl Read, tx: Sender<String>) {
    read_lines(stream, |line| tx.send(line.to_owned()).is_ok());
}

/// Feed `stream` line by line to `sink`, which returns `false` to stop.
fn read_lines(stream: impl Read, mut sink: impl FnMut(&str) -> bool) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if !sink(line.trim_end_matches(['\n', '\r'])) {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "output stream closed early");
                break;
            }
        }
    }
}

fn program_of(argv: &[String]) -> Result<&str> {
    argv.first()
        .map(String::as_str)
        .ok_or_else(|| BuildError::Configuration("empty command line".into()))
}

/// Block until the child exits; interrupted waits are retried.
fn wait(child: &mut Child) -> std::io::Result<ExitStatus> {
    loop {
        match child.wait() {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
