// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: compile :: command  —  toolchain argument vectors
//
//  Every builder returns the full argv (program first). Ordering matters:
//  architecture and fixed defines come before the board's numbered options,
//  and the `-I` flags sit directly in front of the source path so gcc's
//  first-match include precedence follows the include stack.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use chrono::Local;

use crate::config::BuildConfiguration;
use crate::hardware::resolve_tool;

/// Value of the `ARDUINO` define handed to every compile.
pub const ARDUINO_REVISION: u32 = 105;

/// MCU that needs `--relax` to link large programs.
const RELAX_MCU: &str = "atmega2560";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub gcc:     String,
    pub gpp:     String,
    pub ar:      String,
    pub objcopy: String,
}

impl Toolchain {
    /// `build.command.*` overrides, resolved against the toolchain bin dir.
    pub fn from_config(config: &BuildConfiguration, bin_dir: &Path) -> Self {
        let tool = |key: &str, default: &str| resolve_tool(bin_dir, &config.command(key, default));
        Self {
            gcc:     tool("gcc", "avr-gcc"),
            gpp:     tool("g++", "avr-g++"),
            ar:      tool("ar", "avr-ar"),
            objcopy: tool("objcopy", "avr-objcopy"),
        }
    }
}

/// Values fixed once per build (`-DTIME_T`, `-DSERIALNUM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStamp {
    /// Local wall-clock seconds: UTC epoch plus zone and DST offset.
    pub time_t: i64,
    pub serial: i32,
}

impl BuildStamp {
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            time_t: now.timestamp() + i64::from(now.offset().local_minus_utc()),
            serial: rand::random(),
        }
    }
}

/// How the core reaches the linker.
#[derive(Debug, Clone, Copy)]
pub enum CoreLink<'a> {
    Archive(&'a Path),
    /// `build.noarchive`: hand the core objects over directly.
    Objects(&'a [PathBuf]),
}

/// Everything the link step needs besides the configuration.
#[derive(Debug, Clone, Copy)]
pub struct LinkPlan<'a> {
    pub elf:       &'a Path,
    pub objects:   &'a [PathBuf],
    pub core:      CoreLink<'a>,
    pub core_dir:  &'a Path,
    pub build_dir: &'a Path,
}

pub struct CommandBuilder<'a> {
    config:  &'a BuildConfiguration,
    tools:   Toolchain,
    stamp:   BuildStamp,
    verbose: bool,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(config: &'a BuildConfiguration, tools: Toolchain, verbose: bool) -> Self {
        Self { config, tools, stamp: BuildStamp::now(), verbose }
    }

    pub fn with_stamp(mut self, stamp: BuildStamp) -> Self {
        self.stamp = stamp;
        self
    }

    /// `-D<NAME>=<value>` when the board defines `key`.
    fn define(&self, name: &str, key: &str) -> Option<String> {
        self.config.get(key).map(|v| format!("-D{name}={v}"))
    }

    fn warnings(&self) -> &'static str {
        if self.verbose { "-Wall" } else { "-w" }
    }

    /// Menu defines `build.define0` … `build.define9`.
    fn push_menu_defines(&self, argv: &mut Vec<String>) {
        argv.extend(self.config.indexed("build.define", 0..10).into_iter().map(str::to_owned));
    }

    fn push_includes(argv: &mut Vec<String>, includes: &[PathBuf]) {
        argv.extend(includes.iter().map(|dir| format!("-I{}", dir.display())));
    }

    // ── compilers ─────────────────────────────────────────────────────────

    pub fn assembler(&self, includes: &[PathBuf], source: &Path, object: &Path) -> Vec<String> {
        let mut argv = vec![
            self.tools.gcc.clone(),
            "-c".into(),
            "-g".into(),
            "-x".into(),
            "assembler-with-cpp".into(),
            self.config.arch_flag(),
        ];
        argv.extend(self.define("F_CPU", "build.f_cpu"));
        argv.push(format!("-DARDUINO={ARDUINO_REVISION}"));
        argv.extend(self.define("USB_VID", "build.vid"));
        argv.extend(self.define("USB_PID", "build.pid"));
        argv.extend(self.config.numbered("build.option", 1).into_iter().map(str::to_owned));
        self.push_menu_defines(&mut argv);
        Self::push_includes(&mut argv, includes);
        argv.push(source.display().to_string());
        argv.push(format!("-o{}", object.display()));
        argv
    }

    pub fn c(&self, includes: &[PathBuf], source: &Path, object: &Path) -> Vec<String> {
        let mut argv = vec![
            self.tools.gcc.clone(),
            "-c".into(),
            "-g".into(),
            "-Os".into(),
            self.warnings().into(),
            "-ffunction-sections".into(),
            "-fdata-sections".into(),
            self.config.arch_flag(),
        ];
        argv.extend(self.define("F_CPU", "build.f_cpu"));
        argv.push("-MMD".into());
        argv.extend(self.define("USB_VID", "build.vid"));
        argv.extend(self.define("USB_PID", "build.pid"));
        argv.push(format!("-DARDUINO={ARDUINO_REVISION}"));
        argv.extend(self.config.numbered("build.option", 1).into_iter().map(str::to_owned));
        if self.config.is_set("build.thumb") {
            argv.push("-mthumb".into());
        }
        if self.config.is_set("build.time_t") {
            argv.push(format!("-DTIME_T={}", self.stamp.time_t));
        }
        self.push_menu_defines(&mut argv);
        if self.config.flag("build.serial_number") {
            argv.push(format!("-DSERIALNUM={}", self.stamp.serial));
        }
        Self::push_includes(&mut argv, includes);
        argv.push(source.display().to_string());
        argv.push("-o".into());
        argv.push(object.display().to_string());
        argv
    }

    pub fn cpp(&self, includes: &[PathBuf], source: &Path, object: &Path) -> Vec<String> {
        let mut argv = vec![
            self.tools.gpp.clone(),
            "-c".into(),
            "-g".into(),
            "-Os".into(),
            self.warnings().into(),
            "-fno-exceptions".into(),
            "-ffunction-sections".into(),
            "-fdata-sections".into(),
            self.config.arch_flag(),
        ];
        argv.extend(self.define("F_CPU", "build.f_cpu"));
        argv.push("-MMD".into());
        argv.extend(self.define("USB_VID", "build.vid"));
        argv.extend(self.define("USB_PID", "build.pid"));
        argv.push(format!("-DARDUINO={ARDUINO_REVISION}"));
        argv.extend(self.config.numbered("build.option", 1).into_iter().map(str::to_owned));
        argv.extend(self.config.numbered("build.cppoption", 1).into_iter().map(str::to_owned));
        if self.config.flag("build.elide_constructors") {
            argv.push("-felide-constructors".into());
        }
        if self.config.flag("build.cpp0x") {
            argv.push("-std=c++0x".into());
        }
        if self.config.flag("build.gnu0x") {
            argv.push("-std=gnu++0x".into());
        }
        self.push_menu_defines(&mut argv);
        Self::push_includes(&mut argv, includes);
        argv.push(source.display().to_string());
        argv.push("-o".into());
        argv.push(object.display().to_string());
        argv
    }

    // ── archive / link / extract ──────────────────────────────────────────

    /// Append a single object to the core archive.
    pub fn archive(&self, archive: &Path, object: &Path) -> Vec<String> {
        vec![
            self.tools.ar.clone(),
            "rcs".into(),
            archive.display().to_string(),
            object.display().to_string(),
        ]
    }

    pub fn relax(&self) -> bool {
        self.config.get("build.mcu") == Some(RELAX_MCU) || self.config.flag("build.linker_relaxation")
    }

    pub fn link(&self, plan: &LinkPlan<'_>) -> Vec<String> {
        let gc = if self.relax() { "-Wl,--gc-sections,--relax" } else { "-Wl,--gc-sections" };
        let mut argv = vec![
            self.tools.gcc.clone(),
            "-Os".into(),
            gc.into(),
            self.config.arch_flag(),
        ];
        argv.extend(self.config.numbered("build.linkoption", 1).into_iter().map(str::to_owned));
        if let Some(script) = self.config.get("build.linkscript") {
            argv.push(format!("-T{}", plan.core_dir.join(script).display()));
        }
        argv.push("-o".into());
        argv.push(plan.elf.display().to_string());
        argv.extend(plan.objects.iter().map(|o| o.display().to_string()));
        match plan.core {
            CoreLink::Archive(a) => argv.push(a.display().to_string()),
            CoreLink::Objects(objs) => argv.extend(objs.iter().map(|o| o.display().to_string())),
        }
        argv.push(format!("-L{}", plan.build_dir.display()));
        argv.extend(self.config.numbered("build.additionalobject", 1).into_iter().map(str::to_owned));
        argv.push("-lm".into());
        argv
    }

    /// `.eeprom` section only, relocated to address zero.
    pub fn eeprom(&self, elf: &Path, eep: &Path) -> Vec<String> {
        vec![
            self.tools.objcopy.clone(),
            "-O".into(),
            "ihex".into(),
            "-j".into(),
            ".eeprom".into(),
            "--set-section-flags=.eeprom=alloc,load".into(),
            "--no-change-warnings".into(),
            "--change-section-lma".into(),
            ".eeprom=0".into(),
            elf.display().to_string(),
            eep.display().to_string(),
        ]
    }

    pub fn hex(&self, elf: &Path, hex: &Path) -> Vec<String> {
        vec![
            self.tools.objcopy.clone(),
            "-O".into(),
            "ihex".into(),
            "-R".into(),
            ".eeprom".into(),
            elf.display().to_string(),
            hex.display().to_string(),
        ]
    }

    /// `build.elfpatch` tool run on the linked image, if the board has one.
    pub fn elf_patch(&self, tools_dir: &Path, elf: &Path, sketch_dir: &Path) -> Option<Vec<String>> {
        let patcher = self.config.get("build.elfpatch")?;
        Some(vec![
            tools_dir.join(patcher).display().to_string(),
            format!("-mmcu={}", self.config.get("build.mcu").unwrap_or_default()),
            elf.display().to_string(),
            sketch_dir.join("disk").display().to_string(),
        ])
    }

    /// `build.post_compile_script` notification, if the board has one.
    pub fn post_compile(
        &self,
        tools_dir: &Path,
        board_id: &str,
        build_dir: &Path,
        name: &str,
    ) -> Option<Vec<String>> {
        let script = self.config.get("build.post_compile_script")?;
        Some(vec![
            tools_dir.join(script).display().to_string(),
            format!("-board={board_id}"),
            format!("-tools={}{MAIN_SEPARATOR}", tools_dir.display()),
            format!("-path={}", build_dir.display()),
            format!("-file={name}"),
        ])
    }
}
