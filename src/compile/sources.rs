// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: compile :: sources
//
//  Source discovery for one compilation group (sketch, library, core,
//  variant), Arduino library layout detection, and the include search path.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Sources of one compilation group, split by compiler front end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceSet {
    pub asm: Vec<PathBuf>,
    pub c:   Vec<PathBuf>,
    pub cpp: Vec<PathBuf>,
}

impl SourceSet {
    pub fn scan(dir: &Path, recurse: bool) -> Self {
        Self {
            asm: find_files(dir, "S", recurse),
            c:   find_files(dir, "c", recurse),
            cpp: find_files(dir, "cpp", recurse),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.asm.len() + self.c.len() + self.cpp.len()
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Files named `*.<ext>` under `dir`, hidden entries skipped, sorted by path.
pub fn find_files(dir: &Path, ext: &str, recurse: bool) -> Vec<PathBuf> {
    let suffix = format!(".{ext}");
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(if recurse { usize::MAX } else { 1 })
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().ends_with(&suffix))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Immediate, non-hidden sub-directories of `dir`, sorted.
pub fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .flatten()
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    dirs.sort();
    dirs
}

// ─────────────────────────────────────────────────────────────────────────────
//  Library layouts
// ─────────────────────────────────────────────────────────────────────────────

/// How an imported library arranges its sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryLayout {
    /// 1.5 format: `library.properties` + everything under `src/`, recursively.
    Layered { src: PathBuf },
    /// 1.0 format: sources at the root, private helpers in `utility/`.
    Legacy { root: PathBuf, utility: PathBuf },
}

impl LibraryLayout {
    pub fn detect(library: &Path) -> Self {
        let properties = library.join("library.properties");
        let src = library.join("src");
        if properties.is_file() && src.is_dir() {
            LibraryLayout::Layered { src }
        } else {
            LibraryLayout::Legacy {
                root: library.to_owned(),
                utility: library.join("utility"),
            }
        }
    }

    /// Directory other code includes this library's headers from.
    pub fn public_include(&self) -> &Path {
        match self {
            LibraryLayout::Layered { src } => src,
            LibraryLayout::Legacy { root, .. } => root,
        }
    }
}

/// Headers directly inside a library's public include directory.
pub fn header_list(library: &Path) -> std::io::Result<Vec<String>> {
    let layout = LibraryLayout::detect(library);
    let mut headers: Vec<String> = std::fs::read_dir(layout.public_include())?
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".h"))
        .collect();
    headers.sort();
    Ok(headers)
}

// ─────────────────────────────────────────────────────────────────────────────
//  Include search path
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered `-I` directories; the first match wins in gcc.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludePathStack {
    dirs: Vec<PathBuf>,
}

impl IncludePathStack {
    pub fn push(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push(dir.into());
    }

    /// Run `f` with `dir` on top of the stack, restoring the stack afterwards
    /// whatever `f` returns.
    pub fn scoped<R>(&mut self, dir: impl Into<PathBuf>, f: impl FnOnce(&Self) -> R) -> R {
        let depth = self.dirs.len();
        self.dirs.push(dir.into());
        let out = f(self);
        self.dirs.truncate(depth);
        out
    }

    pub fn as_slice(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl FromIterator<PathBuf> for IncludePathStack {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self { dirs: iter.into_iter().collect() }
    }
}
