// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: sketch  —  sketch tabs and error placement
//
//  A sketch folder holds one primary `<folder>.ino` plus optional extra tabs
//  (`.ino`/`.pde` merged into the primary, `.c`/`.cpp`/`.S`/`.h` copied as-is).
//  `prepare` lays those out in the build directory the way the compile
//  pipeline expects:
//
//      <build>/<name>.cpp     ← #include "Arduino.h" + every .ino tab, each
//                               behind a `#line 1 "<tab>"` directive
//      <build>/<extra>.cpp    ← verbatim copies of the other tabs
//
//  Files are only rewritten when their content changes so unchanged sketches
//  hit the incremental cache on the next build.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use crate::diagnostics::SourceLocation;
use crate::error::{BuildError, Result};

/// Maps a compiler-reported `(file, zero-based line)` back to a sketch tab.
pub trait SourceMapper: Sync {
    fn place(&self, message: &str, file: &str, line: usize) -> Option<SourceLocation>;
}

/// Mapper for builds with no sketch tabs to point at.
pub struct Unmapped;

impl SourceMapper for Unmapped {
    fn place(&self, _message: &str, _file: &str, _line: usize) -> Option<SourceLocation> {
        None
    }
}

const MERGED_EXTS: &[&str] = &["ino", "pde"];
const COPIED_EXTS: &[&str] = &["c", "cpp", "S", "h"];

#[derive(Debug, Clone)]
pub struct Tab {
    pub file_name:   String,
    pub path:        PathBuf,
    /// First line of this tab inside the merged `.cpp`, zero-based.
    pub line_offset: usize,
    pub line_count:  usize,
}

impl Tab {
    fn extension(&self) -> &str {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
    }

    fn is_merged(&self) -> bool {
        MERGED_EXTS.contains(&self.extension())
    }

    /// `Blink` for `Blink.ino`, the full file name for anything else.
    pub fn display_name(&self) -> String {
        if self.is_merged() {
            Path::new(&self.file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| self.file_name.clone())
        } else {
            self.file_name.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sketch {
    name: String,
    tabs: Vec<Tab>,
}

impl Sketch {
    /// Enumerate the tabs of a sketch folder; the primary tab comes first.
    pub fn load(folder: &Path) -> Result<Self> {
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "sketch".into());

        let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| !is_hidden(p))
            .filter(|p| {
                let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
                MERGED_EXTS.contains(&ext) || COPIED_EXTS.contains(&ext)
            })
            .collect();
        files.sort();

        let primary = files
            .iter()
            .position(|p| p.file_stem().map(|s| s.to_string_lossy() == name.as_str()).unwrap_or(false)
                && is_merged_path(p))
            .or_else(|| files.iter().position(|p| is_merged_path(p)))
            .ok_or_else(|| BuildError::Configuration(format!(
                "No .ino or .pde sketch found in {}", folder.display()
            )))?;
        let first = files.remove(primary);
        files.insert(0, first);

        let name = files[0]
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or(name);

        let tabs = files
            .into_iter()
            .map(|path| Tab {
                file_name: path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
                path,
                line_offset: 0,
                line_count: 0,
            })
            .collect();

        Ok(Self { name, tabs })
    }

    /// Primary tab stem; also the stem of every build output.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    /// Name of the merged translation unit inside the build directory.
    pub fn merged_file_name(&self) -> String {
        format!("{}.cpp", self.name)
    }

    /// Write the merged `.cpp` and copy the remaining tabs into `build_dir`.
    pub fn prepare(&mut self, build_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(build_dir).map_err(|source| BuildError::CreateDir {
            path: build_dir.to_owned(),
            source,
        })?;

        let mut merged = String::from("#include \"Arduino.h\"\n");
        let mut line = 1;

        for tab in self.tabs.iter_mut() {
            let text = std::fs::read_to_string(&tab.path)?;
            if tab.is_merged() {
                merged.push_str(&format!("#line 1 \"{}\"\n", tab.file_name));
                line += 1;
                tab.line_offset = line;
                tab.line_count = text.lines().count();
                merged.push_str(&text);
                if !text.ends_with('\n') {
                    merged.push('\n');
                }
                line += tab.line_count;
            } else {
                tab.line_count = text.lines().count();
                write_if_changed(&build_dir.join(&tab.file_name), text.as_bytes())?;
            }
        }

        let merged_path = build_dir.join(self.merged_file_name());
        write_if_changed(&merged_path, merged.as_bytes())?;
        Ok(merged_path)
    }
}

impl SourceMapper for Sketch {
    fn place(&self, _message: &str, file: &str, line: usize) -> Option<SourceLocation> {
        if let Some((i, tab)) = self.tabs.iter().enumerate().find(|(_, t)| t.file_name == file) {
            return Some(SourceLocation { tab: i, file: tab.display_name(), line });
        }

        if file == self.merged_file_name() {
            return self
                .tabs
                .iter()
                .enumerate()
                .filter(|(_, t)| t.is_merged())
                .find(|(_, t)| line >= t.line_offset && line < t.line_offset + t.line_count)
                .map(|(i, t)| SourceLocation {
                    tab: i,
                    file: t.display_name(),
                    line: line - t.line_offset,
                });
        }

        None
    }
}

fn is_hidden(p: &Path) -> bool {
    p.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn is_merged_path(p: &Path) -> bool {
    p.extension()
        .and_then(|e| e.to_str())
        .map(|e| MERGED_EXTS.contains(&e))
        .unwrap_or(false)
}

/// Returns `true` when the file was (re)written.
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> std::io::Result<bool> {
    if let Ok(existing) = std::fs::read(path) {
        if existing == bytes {
            return Ok(false);
        }
    }
    std::fs::write(path, bytes)?;
    Ok(true)
}
