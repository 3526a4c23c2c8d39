// ─────────────────────────────────────────────────────────────────────────────
//  tsuki_build  —  public library API
// ─────────────────────────────────────────────────────────────────────────────

pub mod compile;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hardware;
pub mod listener;
pub mod runner;
pub mod sketch;

pub use compile::{BuildOutput, CompileRequest, Compiler};
pub use config::BuildConfiguration;
pub use diagnostics::{Diagnostic, SourceLocation};
pub use error::{BuildError, Result};
pub use hardware::{HardwareLayout, HardwareTree};
pub use listener::{BuildListener, Silent, Transcript};
pub use sketch::{Sketch, SourceMapper};

/// Prepare a sketch folder in `req.build_dir` and run the whole pipeline,
/// attributing compiler errors to the sketch's tabs.
///
/// ```no_run
/// use std::path::Path;
/// use tsuki_build::{build_sketch, BuildConfiguration, CompileRequest, HardwareTree, Silent};
///
/// let config = BuildConfiguration::load(Path::new("boards.toml"), "uno").unwrap();
/// let hardware = HardwareTree::new("/opt/arduino/hardware", "arduino");
/// let req = CompileRequest {
///     sketch_dir:   "Blink".into(),
///     build_dir:    "/tmp/build".into(),
///     project_name: "Blink".into(),
///     board_id:     "uno".into(),
///     libraries:    vec![],
///     verbose:      false,
/// };
/// let out = build_sketch(&config, &hardware, &req, &Silent).unwrap();
/// println!("{}", out.hex.display());
/// ```
pub fn build_sketch(
    config: &BuildConfiguration,
    hardware: &dyn HardwareLayout,
    req: &CompileRequest,
    listener: &dyn BuildListener,
) -> Result<BuildOutput> {
    let mut sketch = Sketch::load(&req.sketch_dir)?;
    sketch.prepare(&req.build_dir)?;
    Compiler::new(config, hardware)
        .with_mapper(&sketch)
        .with_listener(listener)
        .compile(req)
}
