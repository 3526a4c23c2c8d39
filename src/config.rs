// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: config  —  board build configuration
//
//  A board file is a TOML document whose top-level tables are board ids.
//  Each board table is flattened into the dotted key namespace the build
//  pipeline reads from:
//
//      [uno]
//      name = "Arduino Uno"
//
//      [uno.build]
//      mcu      = "atmega328p"
//      f_cpu    = "16000000L"
//      core     = "arduino"
//      variant  = "standard"
//      option1  = "-fno-threadsafe-statics"
//      define0  = "-DUSB_SERIAL"
//
//  becomes  name, build.mcu, build.f_cpu, build.core, build.variant,
//  build.option1, build.define0.
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{BuildError, Result};

/// A whole board file: board id → board table.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct BoardFile {
    boards: BTreeMap<String, toml::Value>,
}

impl BoardFile {
    fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Immutable key/value view of the selected board's build parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildConfiguration {
    values: BTreeMap<String, String>,
}

impl BuildConfiguration {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Presence-based feature switch (`build.noarchive`, `build.thumb`, …).
    pub fn is_set(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Menu-style boolean: only the literal value `true` enables it.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).map(|v| v.trim() == "true").unwrap_or(false)
    }

    /// `prefix{start}`, `prefix{start+1}`, … up to the first missing index.
    pub fn numbered(&self, prefix: &str, start: usize) -> Vec<&str> {
        (start..)
            .map(|i| self.get(&format!("{prefix}{i}")))
            .take_while(Option::is_some)
            .flatten()
            .collect()
    }

    /// Sparse lookup of `prefix{i}` for every `i` in `range`, skipping gaps.
    pub fn indexed(&self, prefix: &str, range: std::ops::Range<usize>) -> Vec<&str> {
        range
            .filter_map(|i| self.get(&format!("{prefix}{i}")))
            .collect()
    }

    /// `-mcpu=<cpu>` when the board names a CPU, otherwise `-mmcu=<mcu>`.
    pub fn arch_flag(&self) -> String {
        match self.get("build.cpu") {
            Some(cpu) => format!("-mcpu={cpu}"),
            None => format!("-mmcu={}", self.get("build.mcu").unwrap_or_default()),
        }
    }

    /// Toolchain command for `build.command.<tool>`, falling back to `default`.
    pub fn command(&self, tool: &str, default: &str) -> String {
        self.get(&format!("build.command.{tool}"))
            .unwrap_or(default)
            .to_owned()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Apply `key=value` overrides (as given on the command line).
    pub fn with_overrides<'a>(mut self, pairs: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        for pair in pairs {
            let (k, v) = pair.split_once('=').ok_or_else(|| BuildError::Config {
                path: "--set".into(),
                reason: format!("expected key=value, got '{pair}'"),
            })?;
            self.values.insert(k.trim().to_owned(), v.trim().to_owned());
        }
        Ok(self)
    }

    /// Select one board out of a TOML board file.
    pub fn from_toml_str(text: &str, board: &str, origin: &Path) -> Result<Self> {
        let file = BoardFile::parse(text).map_err(|e| BuildError::Config {
            path: origin.to_owned(),
            reason: e.to_string(),
        })?;

        let table = match file.boards.get(board) {
            Some(toml::Value::Table(t)) => t,
            _ => {
                return Err(BuildError::Config {
                    path: origin.to_owned(),
                    reason: format!("no board named '{board}'"),
                })
            }
        };

        let mut values = BTreeMap::new();
        flatten("", table, &mut values);
        Ok(Self { values })
    }

    pub fn load(path: &Path, board: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text, board, path)
    }

    /// Board ids defined in a board file, sorted.
    pub fn boards_in(text: &str) -> Vec<String> {
        BoardFile::parse(text)
            .map(|file| {
                file.boards
                    .into_iter()
                    .filter(|(_, v)| v.is_table())
                    .map(|(k, _)| k)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BuildConfiguration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let full = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match value {
            toml::Value::Table(t) => flatten(&full, t, out),
            toml::Value::String(s) => { out.insert(full, s.clone()); }
            other => { out.insert(full, other.to_string()); }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BOARDS: &str = r#"
[uno]
name = "Arduino Uno"

[uno.build]
mcu = "atmega328p"
f_cpu = "16000000L"
core = "arduino"
option1 = "-fno-a"
option2 = "-fno-b"
option4 = "-fno-d"
define0 = "-DONE"
define3 = "-DTHREE"
linker_relaxation = true

[teensy31.build]
cpu = "cortex-m4"
core = "teensy3"
"#;

    fn uno() -> BuildConfiguration {
        BuildConfiguration::from_toml_str(BOARDS, "uno", Path::new("boards.toml")).unwrap()
    }

    #[test]
    fn flattens_board_table_into_dotted_keys() {
        let cfg = uno();
        assert_eq!(cfg.get("name"), Some("Arduino Uno"));
        assert_eq!(cfg.get("build.mcu"), Some("atmega328p"));
        assert_eq!(cfg.get("build.core"), Some("arduino"));
        assert_eq!(cfg.get("build.cpu"), None);
    }

    #[test]
    fn numbered_options_stop_at_first_gap() {
        assert_eq!(uno().numbered("build.option", 1), vec!["-fno-a", "-fno-b"]);
        assert!(uno().numbered("build.linkoption", 1).is_empty());
    }

    #[test]
    fn indexed_defines_skip_gaps() {
        assert_eq!(uno().indexed("build.define", 0..10), vec!["-DONE", "-DTHREE"]);
    }

    #[test]
    fn boolean_scalars_become_menu_flags() {
        let cfg = uno();
        assert!(cfg.flag("build.linker_relaxation"));
        assert!(!cfg.flag("build.cpp0x"));
        assert!(!cfg.is_set("build.noarchive"));
    }

    #[test]
    fn cpu_takes_precedence_over_mcu() {
        let cfg = BuildConfiguration::from_toml_str(BOARDS, "teensy31", Path::new("b")).unwrap();
        assert_eq!(cfg.arch_flag(), "-mcpu=cortex-m4");
        assert_eq!(uno().arch_flag(), "-mmcu=atmega328p");
    }

    #[test]
    fn command_overrides_fall_back_to_defaults() {
        let cfg = uno().with("build.command.gcc", "arm-none-eabi-gcc");
        assert_eq!(cfg.command("gcc", "avr-gcc"), "arm-none-eabi-gcc");
        assert_eq!(cfg.command("ar", "avr-ar"), "avr-ar");
    }

    #[test]
    fn unknown_board_is_a_config_error() {
        let err = BuildConfiguration::from_toml_str(BOARDS, "mega", Path::new("boards.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("no board named 'mega'"));
    }

    #[test]
    fn overrides_replace_loaded_values() {
        let cfg = uno().with_overrides(["build.mcu=atmega2560", "build.noarchive="]).unwrap();
        assert_eq!(cfg.get("build.mcu"), Some("atmega2560"));
        assert!(cfg.is_set("build.noarchive"));
        assert!(uno().with_overrides(["oops"]).is_err());
    }

    #[test]
    fn lists_board_ids() {
        assert_eq!(BuildConfiguration::boards_in(BOARDS), vec!["teensy31", "uno"]);
    }
}
