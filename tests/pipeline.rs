// ─────────────────────────────────────────────────────────────────────────────
//  End-to-end pipeline runs against a fake toolchain made of shell scripts.
//
//  cc.sh    logs "<source>|<argv>" per compile, writes the object and a
//           Make-style record; without -c it links (writes the elf), failing
//           with a Robot_Control/Wire message when `fail-link` exists
//  ar.sh    logs the appended object
//  objcopy  writes its last argument
// ─────────────────────────────────────────────────────────────────────────────

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use walkdir::WalkDir;

use tsuki_build::{
    BuildConfiguration, BuildError, BuildOutput, CompileRequest, Compiler, HardwareTree, Sketch,
    SourceLocation, Transcript,
};

const CC: &str = r#"#!/bin/sh
out=""; src=""; compile=0; prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  case "$a" in
    -c) compile=1 ;;
    -o|-Os) ;;
    -o*) out="${a#-o}" ;;
    -*) ;;
    *.c|*.cpp|*.S) src="$a" ;;
  esac
  prev="$a"
done
if [ $compile = 1 ]; then
  echo "$src|$*" >> "@DIR@/compile.log"
  if grep -q BYTE "$src"; then
    n=$(grep -n BYTE "$src" | head -1 | cut -d: -f1)
    echo "$src:$n: error: 'BYTE' was not declared in this scope" >&2
    exit 1
  fi
  echo obj > "$out"
  case "$src" in
    *.S) ;;
    *) printf '%s: %s\n' "$out" "$src" > "${out%.o}.d" ;;
  esac
else
  echo "$*" >> "@DIR@/link.log"
  if [ -f "@DIR@/fail-link" ]; then
    echo "@DIR@/libraries/Robot_Control/ArduinoRobot.cpp:41: undefined reference to \`Wire'" >&2
    echo "collect2: error: ld returned 1 exit status" >&2
    exit 1
  fi
  echo elf > "$out"
fi
"#;

const AR: &str = r#"#!/bin/sh
echo "$3" >> "@DIR@/ar.log"
echo "$3" >> "$2"
"#;

const OBJCOPY: &str = r#"#!/bin/sh
for a in "$@"; do last="$a"; done
echo ihex > "$last"
"#;

struct Rig {
    dir:      TempDir,
    hardware: HardwareTree,
    config:   BuildConfiguration,
}

impl Rig {
    /// Sketch `Blink/Blink.ino`, core `arduino` with the given sources.
    fn new(core_sources: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let bin = root.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        for (name, body) in [("cc.sh", CC), ("ar.sh", AR), ("objcopy.sh", OBJCOPY)] {
            let path = bin.join(name);
            std::fs::write(&path, body.replace("@DIR@", &root.display().to_string())).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let core = root.join("hw/arduino/cores/arduino");
        std::fs::create_dir_all(&core).unwrap();
        std::fs::write(core.join("Arduino.h"), "#pragma once\n").unwrap();
        for name in core_sources {
            std::fs::write(core.join(name), "/* core */\n").unwrap();
        }

        let sketch = root.join("Blink");
        std::fs::create_dir_all(&sketch).unwrap();
        std::fs::write(sketch.join("Blink.ino"), "void setup() {}\nvoid loop() {}\n").unwrap();

        let config: BuildConfiguration = [
            ("build.mcu", "atmega328p"),
            ("build.f_cpu", "16000000L"),
            ("build.core", "arduino"),
        ]
        .into_iter()
        .collect();
        let config = config
            .with("build.command.gcc", bin.join("cc.sh").display().to_string())
            .with("build.command.g++", bin.join("cc.sh").display().to_string())
            .with("build.command.ar", bin.join("ar.sh").display().to_string())
            .with("build.command.objcopy", bin.join("objcopy.sh").display().to_string());

        let hardware = HardwareTree::new(root.join("hw"), "arduino");
        Self { dir, hardware, config }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn request(&self, libraries: Vec<PathBuf>) -> CompileRequest {
        CompileRequest {
            sketch_dir:   self.root().join("Blink"),
            build_dir:    self.root().join("build"),
            project_name: "Blink".into(),
            board_id:     "uno".into(),
            libraries,
            verbose:      false,
        }
    }

    /// Lay the sketch out in the build dir and age every input, so objects
    /// written during the build are strictly newer on coarse-clock filesystems.
    fn prepare(&self) -> Sketch {
        let mut sketch = Sketch::load(&self.root().join("Blink")).unwrap();
        sketch.prepare(&self.root().join("build")).unwrap();
        let hour_ago = SystemTime::now() - Duration::from_secs(3600);
        for dir in ["build", "hw", "libs"] {
            for entry in WalkDir::new(self.root().join(dir)).into_iter().flatten() {
                if entry.file_type().is_file() {
                    std::fs::File::options()
                        .write(true)
                        .open(entry.path())
                        .unwrap()
                        .set_modified(hour_ago)
                        .unwrap();
                }
            }
        }
        sketch
    }

    fn build(
        &self,
        sketch: &Sketch,
        req: &CompileRequest,
        log: &Transcript,
    ) -> Result<BuildOutput, BuildError> {
        Compiler::new(&self.config, &self.hardware)
            .with_mapper(sketch)
            .with_listener(log)
            .compile(req)
    }

    fn log(&self, name: &str) -> Vec<String> {
        std::fs::read_to_string(self.root().join(name))
            .map(|s| s.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}

fn write(path: PathBuf, text: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

/// The logged argv of the compile whose source ends with `suffix`.
fn compile_of(compiles: &[String], suffix: &str) -> String {
    compiles
        .iter()
        .find(|l| l.split('|').next().unwrap().ends_with(suffix))
        .unwrap_or_else(|| panic!("no compile of {suffix}"))
        .clone()
}

/// `-I` directories of a logged argv, in order.
fn include_flags(line: &str) -> Vec<String> {
    line.split_whitespace()
        .filter(|a| a.starts_with("-I"))
        .map(str::to_owned)
        .collect()
}

#[test]
fn unchanged_sketch_rebuild_reuses_every_object() {
    let rig = Rig::new(&["wiring.c"]);
    let sketch = rig.prepare();
    let req = rig.request(vec![]);

    let log = Transcript::default();
    let first = rig.build(&sketch, &req, &log).unwrap();
    assert_eq!((first.compiled, first.reused), (2, 0));
    assert_eq!(rig.log("compile.log").len(), 2);
    assert!(first.hex.is_file());
    assert!(first.eep.is_file());
    assert_eq!(log.percentages(), vec![20, 30, 40, 50, 60, 70, 80, 90]);

    std::fs::remove_file(&first.hex).unwrap();
    std::fs::remove_file(&first.eep).unwrap();

    let second = rig.build(&sketch, &req, &Transcript::default()).unwrap();
    assert_eq!((second.compiled, second.reused), (0, 2));
    assert_eq!(rig.log("compile.log").len(), 2, "no compiler runs on the second build");
    assert_eq!(rig.log("link.log").len(), 2);
    assert_eq!(rig.log("ar.log").len(), 2);
    assert!(second.hex.is_file());
    assert!(second.eep.is_file());
    assert_eq!(second.core_archive, rig.root().join("build/core.a"));
}

#[test]
fn touching_a_core_source_recompiles_only_that_file() {
    let rig = Rig::new(&["wiring.c", "main.cpp"]);
    let sketch = rig.prepare();
    let req = rig.request(vec![]);
    rig.build(&sketch, &req, &Transcript::default()).unwrap();

    let wiring = rig.root().join("hw/arduino/cores/arduino/wiring.c");
    std::fs::write(&wiring, "/* edited */\n").unwrap();
    let future = SystemTime::now() + Duration::from_secs(60);
    std::fs::File::options()
        .write(true)
        .open(&wiring)
        .unwrap()
        .set_modified(future)
        .unwrap();

    let out = rig.build(&sketch, &req, &Transcript::default()).unwrap();
    assert_eq!((out.compiled, out.reused), (1, 2));
    let last = rig.log("compile.log").pop().unwrap();
    assert!(last.starts_with(&format!("{}|", wiring.display())));
}

#[test]
fn archiver_runs_once_per_core_object() {
    let rig = Rig::new(&["a.c", "b.c", "c.cpp"]);
    let sketch = rig.prepare();
    let out = rig.build(&sketch, &rig.request(vec![]), &Transcript::default()).unwrap();

    let build = rig.root().join("build");
    assert_eq!(
        rig.log("ar.log"),
        vec![
            build.join("a.c.o").display().to_string(),
            build.join("b.c.o").display().to_string(),
            build.join("c.cpp.o").display().to_string(),
        ]
    );
    let link = rig.log("link.log").join("\n");
    assert!(link.contains(&out.core_archive.display().to_string()));
    assert!(!link.contains(&build.join("a.c.o").display().to_string()));
}

#[test]
fn noarchive_links_core_objects_directly() {
    let mut rig = Rig::new(&["a.c"]);
    rig.config = rig.config.clone().with("build.noarchive", "");
    let sketch = rig.prepare();
    rig.build(&sketch, &rig.request(vec![]), &Transcript::default()).unwrap();

    let link = rig.log("link.log").join("\n");
    assert!(link.contains(&rig.root().join("build/a.c.o").display().to_string()));
    assert!(!link.contains("core.a"));
}

#[test]
fn variant_objects_are_linked_but_never_archived() {
    let mut rig = Rig::new(&["wiring.c"]);
    let variant = rig.root().join("hw/arduino/variants/standard");
    write(variant.join("pins_arduino.h"), "#pragma once\n");
    write(variant.join("pins.c"), "/* pins */\n");
    rig.config = rig.config.clone().with("build.variant", "standard");

    let libs = rig.root().join("libs");
    write(libs.join("Servo/Servo.cpp"), "");
    let sketch = rig.prepare();
    let req = rig.request(vec![libs.join("Servo")]);
    rig.build(&sketch, &req, &Transcript::default()).unwrap();

    let pins_obj = rig.root().join("build/pins.c.o").display().to_string();
    let archived = rig.log("ar.log");
    assert_eq!(archived, vec![rig.root().join("build/wiring.c.o").display().to_string()]);
    assert!(!archived.contains(&pins_obj));
    assert!(rig.log("link.log").join("\n").contains(&pins_obj));

    let core = rig.root().join("hw/arduino/cores/arduino");
    let compiles = rig.log("compile.log");
    assert_eq!(
        include_flags(&compile_of(&compiles, "pins.c")),
        vec![format!("-I{}", core.display()), format!("-I{}", variant.display())]
    );
    let sketch_includes = include_flags(&compile_of(&compiles, "Blink.cpp"));
    assert!(sketch_includes.contains(&format!("-I{}", libs.join("Servo").display())));
}

#[test]
fn libraries_compile_into_their_own_folders_with_scoped_includes() {
    let rig = Rig::new(&["wiring.c"]);
    let libs = rig.root().join("libs");
    write(libs.join("Wire/Wire.cpp"), "");
    write(libs.join("Wire/Wire.h"), "");
    write(libs.join("Wire/utility/twi.c"), "");
    write(libs.join("SD/library.properties"), "name=SD\n");
    write(libs.join("SD/src/SD.cpp"), "");
    write(libs.join("SD/src/utility/Sd2Card.cpp"), "");
    let sketch = rig.prepare();

    let req = rig.request(vec![libs.join("Wire"), libs.join("SD")]);
    rig.build(&sketch, &req, &Transcript::default()).unwrap();

    let build = rig.root().join("build");
    let objects = [
        "Wire/Wire.cpp.o",
        "Wire/utility/twi.c.o",
        "SD/SD.cpp.o",
        "SD/utility/Sd2Card.cpp.o",
    ];
    for obj in objects {
        assert!(build.join(obj).is_file(), "{obj}");
    }

    let compiles = rig.log("compile.log");
    let argv_of = |suffix: &str| compile_of(&compiles, suffix);
    let wire_utility = format!("-I{}", libs.join("Wire/utility").display());
    let sd_src = format!("-I{}", libs.join("SD/src").display());

    // sketch sees every public include dir, nobody else's private one
    let blink = argv_of("Blink.cpp");
    assert!(blink.contains(&sd_src));
    assert!(!blink.contains(&wire_utility));

    assert!(argv_of("Wire.cpp").contains(&wire_utility));
    assert!(argv_of("twi.c").contains(&wire_utility));
    assert!(!argv_of("SD.cpp").contains(&wire_utility));
    assert!(!argv_of("wiring.c").contains(&sd_src));
}

#[test]
fn sketch_error_is_attributed_to_its_tab() {
    let rig = Rig::new(&["wiring.c"]);
    std::fs::write(
        rig.root().join("Blink/Blink.ino"),
        "void setup() {}\nvoid loop() {\n  Serial.print(65, BYTE);\n}\n",
    )
    .unwrap();
    let sketch = rig.prepare();
    let log = Transcript::default();

    let err = rig.build(&sketch, &rig.request(vec![]), &log).unwrap_err();
    let d = err.diagnostic().expect("promoted diagnostic");
    assert_eq!(d.location, Some(SourceLocation { tab: 0, file: "Blink".into(), line: 2 }));
    assert_eq!(d.headline(), "The 'BYTE' keyword is no longer supported.");
    assert!(log.lines()[0].starts_with("Blink:3: error: 'BYTE' was not declared in this scope"));
    assert!(rig.log("link.log").is_empty());
}

#[test]
fn robot_control_wire_link_failure_is_explained() {
    let rig = Rig::new(&["wiring.c"]);
    std::fs::write(rig.root().join("fail-link"), "").unwrap();
    let sketch = rig.prepare();

    let req = rig.request(vec![]);
    let err = rig.build(&sketch, &req, &Transcript::default()).unwrap_err();
    assert!(matches!(err, BuildError::Compile(_)));
    assert_eq!(
        err.to_string(),
        "Please import the Wire library from the Sketch > Import Library menu."
    );
    assert!(!req.build_dir.join("Blink.hex").exists());
}

#[test]
fn post_compile_script_receives_build_coordinates() {
    let mut rig = Rig::new(&["wiring.c"]);
    let tools = rig.root().join("hw/tools");
    std::fs::create_dir_all(&tools).unwrap();
    let script = tools.join("notify.sh");
    std::fs::write(
        &script,
        format!("#!/bin/sh\necho \"$*\" > \"{}/notify.log\"\necho noisy >&2\n", rig.root().display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    rig.config = rig.config.clone().with("build.post_compile_script", "notify.sh");

    let sketch = rig.prepare();
    rig.build(&sketch, &rig.request(vec![]), &Transcript::default()).unwrap();

    assert_eq!(
        rig.log("notify.log"),
        vec![format!(
            "-board=uno -tools={}/ -path={} -file=Blink",
            tools.display(),
            rig.root().join("build").display()
        )]
    );
}
