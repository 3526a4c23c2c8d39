// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: hardware  —  core / variant / toolchain directory lookup
//
//  A hardware tree looks like the Arduino 1.0 `hardware/` folder:
//
//      hardware/
//      ├── arduino/            ← provider (platform folder)
//      │   ├── cores/arduino/
//      │   └── variants/standard/
//      ├── teensy/
//      │   ├── cores/teensy3/
//      │   └── variants/…
//      └── tools/              ← elf patchers, post-compile scripts, avr/bin
//
//  Core and variant ids are either bare (`arduino`, resolved against the
//  selected provider) or namespaced (`teensy:teensy3`).
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};

/// Directory resolution the pipeline needs from the installed hardware.
pub trait HardwareLayout {
    fn core_dir(&self, id: &str) -> Result<PathBuf>;
    fn variant_dir(&self, id: &str) -> Result<PathBuf>;
    /// Directory holding the compiler binaries; empty means "use PATH".
    fn toolchain_bin(&self) -> PathBuf;
    /// Folder containing elf patchers and post-compile scripts.
    fn tools_dir(&self) -> PathBuf;
}

/// [`HardwareLayout`] backed by an on-disk hardware folder.
#[derive(Debug, Clone)]
pub struct HardwareTree {
    root:          PathBuf,
    provider:      String,
    toolchain_bin: PathBuf,
}

impl HardwareTree {
    pub fn new(root: impl Into<PathBuf>, provider: impl Into<String>) -> Self {
        let root = root.into();
        // IDE 1.x bundles avr-gcc in hardware/tools/avr/bin
        let bundled = root.join("tools").join("avr").join("bin");
        let toolchain_bin = if bundled.is_dir() { bundled } else { PathBuf::new() };
        Self { root, provider: provider.into(), toolchain_bin }
    }

    pub fn with_toolchain_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.toolchain_bin = bin.into();
        self
    }

    fn provider_dir(&self, provider: &str) -> Result<PathBuf> {
        let dir = self.root.join(provider);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(BuildError::Configuration(format!(
                "Unknown hardware provider '{provider}' (looked in {})",
                self.root.display()
            )))
        }
    }

    fn resolve(&self, id: &str, kind: &str) -> Result<PathBuf> {
        let (provider, name) = split_qualified(id).unwrap_or((self.provider.as_str(), id));
        Ok(self.provider_dir(provider)?.join(kind).join(name))
    }
}

impl HardwareLayout for HardwareTree {
    fn core_dir(&self, id: &str) -> Result<PathBuf> {
        self.resolve(id, "cores")
    }

    fn variant_dir(&self, id: &str) -> Result<PathBuf> {
        self.resolve(id, "variants")
    }

    fn toolchain_bin(&self) -> PathBuf {
        self.toolchain_bin.clone()
    }

    fn tools_dir(&self) -> PathBuf {
        self.root.join("tools")
    }
}

/// `provider:name` → `(provider, name)`.
pub fn split_qualified(id: &str) -> Option<(&str, &str)> {
    id.split_once(':')
}

/// Full path of a toolchain binary; bare name when no bin dir is known.
pub fn resolve_tool(bin_dir: &Path, name: &str) -> String {
    if bin_dir.as_os_str().is_empty() {
        return name.to_owned(); // rely on PATH
    }
    let p = bin_dir.join(name);
    if p.exists() { p.to_string_lossy().to_string() } else { name.to_owned() }
}
