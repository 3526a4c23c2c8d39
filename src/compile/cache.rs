// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: compile :: cache
//
//  Decides whether an object file can be reused. gcc's `-MMD` leaves a
//  Make-style dependency record next to every C/C++ object:
//
//      /tmp/build/Blink.cpp.o: /tmp/build/Blink.cpp \
//        /hw/arduino/cores/arduino/Arduino.h
//
//  An object is reused only when it, its record, and every prerequisite the
//  record names are in place and strictly older than the object.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::debug;

/// Rebuilt on every run; it embeds the build time.
pub const ALWAYS_REBUILD: &str = "mk20dx128.c";

/// Why an object has to be rebuilt. Never surfaced as a build failure.
#[derive(Debug, Error)]
pub enum DependencyCacheError {
    #[error("always rebuilt")]
    AlwaysRebuilt,
    #[error("no object file")]
    MissingObject,
    #[error("no dependency record")]
    MissingRecord,
    #[error("source is not older than {}", .0.display())]
    SourceNewer(PathBuf),
    #[error("unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("record names no target")]
    MissingTarget,
    #[error("record describes {}", .0.display())]
    TargetMismatch(PathBuf),
    #[error("prerequisite {} is gone", .0.display())]
    MissingPrerequisite(PathBuf),
    #[error("prerequisite {} is newer than the object", .0.display())]
    StalePrerequisite(PathBuf),
}

/// Object path for `source` compiled into `out_dir`: `Blink.cpp` → `Blink.cpp.o`.
pub fn object_for(out_dir: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    out_dir.join(format!("{name}.o"))
}

/// Dependency record gcc writes beside `object`: `Blink.cpp.o` → `Blink.cpp.d`.
pub fn record_for(object: &Path) -> PathBuf {
    object.with_extension("d")
}

/// `true` unless every freshness check passes. The reason is logged at debug.
pub fn needs_recompile(source: &Path, object: &Path, record: &Path) -> bool {
    match check(source, object, record) {
        Ok(()) => false,
        Err(reason) => {
            debug!(source = %source.display(), %reason, "recompiling");
            true
        }
    }
}

pub fn check(source: &Path, object: &Path, record: &Path) -> Result<(), DependencyCacheError> {
    if source.file_name().is_some_and(|n| n == ALWAYS_REBUILD) {
        return Err(DependencyCacheError::AlwaysRebuilt);
    }
    if !object.exists() {
        return Err(DependencyCacheError::MissingObject);
    }
    if !record.exists() {
        return Err(DependencyCacheError::MissingRecord);
    }

    let source_time = modified(source)?;
    let object_time = modified(object)?;
    // equal timestamps are ambiguous on coarse filesystems
    if source_time >= object_time {
        return Err(DependencyCacheError::SourceNewer(object.to_owned()));
    }
    if source_time >= modified(record)? {
        return Err(DependencyCacheError::SourceNewer(record.to_owned()));
    }

    let text = std::fs::read_to_string(record)?;
    let parsed = parse_dependency_record(&text)?;

    let target = std::fs::canonicalize(&parsed.target)
        .map_err(|_| DependencyCacheError::TargetMismatch(parsed.target.clone()))?;
    if target != std::fs::canonicalize(object)? {
        return Err(DependencyCacheError::TargetMismatch(parsed.target));
    }

    for prerequisite in parsed.prerequisites {
        let time = match std::fs::metadata(&prerequisite).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return Err(DependencyCacheError::MissingPrerequisite(prerequisite)),
        };
        if time >= object_time {
            return Err(DependencyCacheError::StalePrerequisite(prerequisite));
        }
    }
    Ok(())
}

fn modified(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

// ─────────────────────────────────────────────────────────────────────────────
//  Dependency record syntax
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed `.d` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    pub target:        PathBuf,
    pub prerequisites: Vec<PathBuf>,
}

/// Parse Make dependency syntax as gcc emits it.
///
/// Backslash-newline joins lines, `\ ` and `\#` are literal characters.
/// The first word is the target and must carry the rule colon. Phony rules
/// from `-MP` (`header.h:`) only repeat prerequisites, so their trailing
/// colon is dropped and the path is checked like any other.
pub fn parse_dependency_record(text: &str) -> Result<DependencyRecord, DependencyCacheError> {
    let mut words = tokenize(text).into_iter();

    let mut target = words.next().ok_or(DependencyCacheError::MissingTarget)?;
    let mut rest: Vec<String> = words.collect();
    if target.ends_with(':') {
        target.pop();
    } else if rest.first().map(String::as_str) == Some(":") {
        rest.remove(0);
    } else {
        return Err(DependencyCacheError::MissingTarget);
    }
    if target.is_empty() {
        return Err(DependencyCacheError::MissingTarget);
    }

    let mut prerequisites: Vec<PathBuf> = Vec::new();
    for mut word in rest {
        if word.ends_with(':') {
            word.pop();
        }
        if word.is_empty() {
            continue;
        }
        let path = PathBuf::from(word);
        if !prerequisites.contains(&path) {
            prerequisites.push(path);
        }
    }

    Ok(DependencyRecord { target: PathBuf::from(target), prerequisites })
}

fn tokenize(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek().copied() {
                Some('\n') => {
                    chars.next();
                    flush(&mut word, &mut words);
                }
                Some('\r') => {
                    chars.next();
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    flush(&mut word, &mut words);
                }
                Some(escaped @ (' ' | '#')) => {
                    chars.next();
                    word.push(escaped);
                }
                _ => word.push('\\'),
            },
            c if c.is_whitespace() => flush(&mut word, &mut words),
            c => word.push(c),
        }
    }
    flush(&mut word, &mut words);
    words
}

fn flush(word: &mut String, words: &mut Vec<String>) {
    if !word.is_empty() {
        words.push(std::mem::take(word));
    }
}
