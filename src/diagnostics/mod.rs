// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: diagnostics  —  compiler output → build errors
//
//  Every line a tool prints passes through `Translator::observe`:
//
//    1. strip the build directory prefix (unless verbose)
//    2. match `file.ext:line[:col]: error: message`
//    3. swap known Arduino 1.0 API-break messages for friendly ones
//    4. while the sketch itself compiles, map the first error back to a tab
//    5. catch Robot_Control link failures that name no source line
//
//  The first promoted diagnostic becomes the build failure; every line is
//  still forwarded to the listener.
// ─────────────────────────────────────────────────────────────────────────────

pub mod hints;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex};

use regex::Regex;

use crate::listener::BuildListener;
use crate::sketch::SourceMapper;

static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\w\d_]+\.\w+):(\d+):\s*error:\s*(.*)\s*").expect("valid regex")
});

static ERROR_LINE_COL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\w\d_]+\.\w+):(\d+):\d+:\s*error:\s*(.*)\s*").expect("valid regex")
});

/// A place in the user's sketch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Index of the owning tab.
    pub tab:  usize,
    /// Display name of the tab (`Blink` for `Blink.ino`).
    pub file: String,
    /// Zero-based line within the tab.
    pub line: usize,
}

/// A compiler error recovered from tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub location:         Option<SourceLocation>,
    pub raw_message:      String,
    pub friendly_message: Option<String>,
    pub note:             Option<String>,
}

impl Diagnostic {
    /// Unattributed diagnostic carrying only a friendly headline.
    pub fn headline_only(text: &str) -> Self {
        Self {
            location: None,
            raw_message: text.to_owned(),
            friendly_message: None,
            note: None,
        }
    }

    pub fn headline(&self) -> &str {
        self.friendly_message.as_deref().unwrap_or(&self.raw_message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.headline())
    }
}

/// One raw `error:` line split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLine<'a> {
    pub file:    &'a str,
    /// One-based, as printed by the compiler.
    pub line:    usize,
    pub message: &'a str,
}

/// Match a compiler error line; the column-less form is tried first.
pub fn parse_error_line(s: &str) -> Option<ErrorLine<'_>> {
    let caps = ERROR_LINE.captures(s).or_else(|| ERROR_LINE_COL.captures(s))?;
    Some(ErrorLine {
        file:    caps.get(1)?.as_str(),
        line:    caps.get(2)?.as_str().parse().ok()?,
        message: caps.get(3)?.as_str(),
    })
}

/// Remove every literal occurrence of `prefix` from `line`.
pub fn strip_prefix_everywhere(line: &str, prefix: &str) -> String {
    let mut s = line.to_owned();
    if prefix.is_empty() {
        return s;
    }
    while let Some(i) = s.find(prefix) {
        s.replace_range(i..i + prefix.len(), "");
    }
    s
}

/// Per-build diagnostic state shared by the stream-draining threads.
pub struct Translator<'a> {
    build_prefix:    String,
    verbose:         bool,
    core:            Option<String>,
    mapper:          &'a dyn SourceMapper,
    listener:        &'a dyn BuildListener,
    sketch_compiled: AtomicBool,
    promoted:        Mutex<Option<Diagnostic>>,
}

impl<'a> Translator<'a> {
    pub fn new(
        build_dir: &Path,
        verbose: bool,
        core: Option<&str>,
        mapper: &'a dyn SourceMapper,
        listener: &'a dyn BuildListener,
    ) -> Self {
        Self {
            build_prefix: format!(
                "{}{}",
                build_dir.components().collect::<PathBuf>().display(),
                std::path::MAIN_SEPARATOR
            ),
            verbose,
            core: core.map(str::to_owned),
            mapper,
            listener,
            sketch_compiled: AtomicBool::new(false),
            promoted: Mutex::new(None),
        }
    }

    /// Stop attributing errors to sketch tabs (libraries and core follow).
    pub fn mark_sketch_compiled(&self) {
        self.sketch_compiled.store(true, Ordering::SeqCst);
    }

    pub fn sketch_compiled(&self) -> bool {
        self.sketch_compiled.load(Ordering::SeqCst)
    }

    /// The diagnostic promoted so far in this build, if any.
    pub fn first_diagnostic(&self) -> Option<Diagnostic> {
        self.promoted.lock().ok().and_then(|p| p.clone())
    }

    /// Feed one line of tool output.
    pub fn observe(&self, line: &str) {
        let mut s = if self.verbose {
            line.to_owned()
        } else {
            strip_prefix_everywhere(line, &self.build_prefix)
        };

        if let Some(parsed) = parse_error_line(&s) {
            if let Some(rewritten) = self.on_error(&parsed) {
                s = rewritten;
            }
        }

        if let Some(headline) = hints::link_hint(&s) {
            self.promote(|| Some(Diagnostic::headline_only(headline)));
        }

        self.listener.output(&s);
    }

    /// Returns the replacement echo line when the error was attributed.
    fn on_error(&self, err: &ErrorLine<'_>) -> Option<String> {
        let raw = err.message.trim();
        let rewrite = hints::lookup(raw, self.core.as_deref());
        let headline = rewrite.error.unwrap_or(raw);

        // Libraries and the core may contain a file with the sketch's name.
        if self.sketch_compiled() {
            return None;
        }

        let location = self
            .mapper
            .place(headline, err.file, err.line.saturating_sub(1))?;

        let echo = match rewrite.note {
            Some(note) => format!("{}:{}: error: {}\n{}", location.file, location.line + 1, err.message, note),
            None => format!("{}:{}: error: {}", location.file, location.line + 1, err.message),
        };

        self.promote(|| {
            Some(Diagnostic {
                location: Some(location),
                raw_message: raw.to_owned(),
                friendly_message: rewrite.error.map(str::to_owned),
                note: rewrite.note.map(str::to_owned),
            })
        });

        (!self.verbose).then_some(echo)
    }

    /// First writer wins; later candidates are dropped.
    fn promote(&self, make: impl FnOnce() -> Option<Diagnostic>) {
        let Ok(mut slot) = self.promoted.lock() else { return };
        if slot.is_none() {
            *slot = make();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Transcript;
    use crate::sketch::Unmapped;
    use pretty_assertions::assert_eq;

    /// Maps any `<tab>.ino` name straight onto tab 0.
    struct OneTab(&'static str);

    impl SourceMapper for OneTab {
        fn place(&self, _message: &str, file: &str, line: usize) -> Option<SourceLocation> {
            (file == format!("{}.ino", self.0)).then(|| SourceLocation {
                tab: 0,
                file: self.0.to_owned(),
                line,
            })
        }
    }

    #[test]
    fn parses_both_error_shapes() {
        let e = parse_error_line("foo.ino:12: error: 'BYTE' was not declared in this scope").unwrap();
        assert_eq!((e.file, e.line, e.message), ("foo.ino", 12, "'BYTE' was not declared in this scope"));

        let e = parse_error_line("Blink.cpp:7:3: error: expected ';'").unwrap();
        assert_eq!((e.file, e.line, e.message), ("Blink.cpp", 7, "expected ';'"));

        assert!(parse_error_line("Blink.cpp:7: warning: unused variable").is_none());
        assert!(parse_error_line("In function 'void setup()':").is_none());
    }

    #[test]
    fn strips_every_build_dir_occurrence() {
        let s = strip_prefix_everywhere("/tmp/build/a.cpp: /tmp/build/b.h", "/tmp/build/");
        assert_eq!(s, "a.cpp: b.h");
        assert_eq!(strip_prefix_everywhere("x", ""), "x");
    }

    #[test]
    fn byte_error_is_attributed_and_rewritten() {
        let mapper = OneTab("foo");
        let log = Transcript::default();
        let t = Translator::new(Path::new("/tmp/build"), false, Some("arduino"), &mapper, &log);

        t.observe("/tmp/build/foo.ino:12: error: 'BYTE' was not declared in this scope");
        t.observe("/tmp/build/foo.ino:14: error: 'Udp' was not declared in this scope");

        let d = t.first_diagnostic().unwrap();
        assert_eq!(d.location, Some(SourceLocation { tab: 0, file: "foo".into(), line: 11 }));
        assert_eq!(d.headline(), "The 'BYTE' keyword is no longer supported.");
        assert_eq!(d.raw_message, "'BYTE' was not declared in this scope");

        let lines = log.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("foo:12: error: 'BYTE' was not declared in this scope\n"));
        assert!(!lines[1].contains("/tmp/build/"));
    }

    #[test]
    fn trailing_separator_on_build_dir_still_strips() {
        let log = Transcript::default();
        let t = Translator::new(Path::new("/tmp/build/"), false, None, &Unmapped, &log);

        t.observe("/tmp/build/core/wiring.c:3: warning: unused variable 'x'");
        assert_eq!(log.lines(), vec!["core/wiring.c:3: warning: unused variable 'x'".to_string()]);
    }

    #[test]
    fn verbose_keeps_raw_output() {
        let mapper = OneTab("foo");
        let log = Transcript::default();
        let t = Translator::new(Path::new("/tmp/build"), true, None, &mapper, &log);

        t.observe("/tmp/build/foo.ino:3: error: oops");
        assert_eq!(log.lines(), vec!["/tmp/build/foo.ino:3: error: oops".to_string()]);
        assert!(t.first_diagnostic().is_some());
    }

    #[test]
    fn no_attribution_after_sketch_compiled() {
        let mapper = OneTab("foo");
        let log = Transcript::default();
        let t = Translator::new(Path::new("/tmp/build"), false, None, &mapper, &log);

        t.mark_sketch_compiled();
        t.observe("foo.ino:12: error: 'BYTE' was not declared in this scope");
        assert!(t.first_diagnostic().is_none());
        assert_eq!(log.lines()[0], "foo.ino:12: error: 'BYTE' was not declared in this scope");
    }

    #[test]
    fn unmappable_errors_are_not_promoted() {
        let mapper = OneTab("foo");
        let log = Transcript::default();
        let t = Translator::new(Path::new("/b"), false, None, &mapper, &log);

        t.observe("other.cpp:1: error: boom");
        assert!(t.first_diagnostic().is_none());
    }

    #[test]
    fn robot_control_link_failure_is_promoted() {
        let mapper = OneTab("foo");
        let log = Transcript::default();
        let t = Translator::new(Path::new("/b"), false, None, &mapper, &log);
        t.mark_sketch_compiled();

        t.observe("/x/libraries/Robot_Control/ArduinoRobot.cpp:12: undefined reference to `Wire'");
        let d = t.first_diagnostic().unwrap();
        assert_eq!(d.headline(), "Please import the Wire library from the Sketch > Import Library menu.");
        assert_eq!(d.location, None);
    }

    #[test]
    fn concurrent_observers_promote_once() {
        let mapper = OneTab("foo");
        let log = Transcript::default();
        let t = Translator::new(Path::new("/b"), false, None, &mapper, &log);

        std::thread::scope(|s| {
            for n in 0..8 {
                let t = &t;
                s.spawn(move || t.observe(&format!("foo.ino:{}: error: e{n}", n + 1)));
            }
        });

        assert!(t.first_diagnostic().is_some());
        assert_eq!(log.lines().len(), 8);
    }
}
