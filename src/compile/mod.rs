// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: compile  —  build pipeline orchestrator
//
//  Stages run strictly in order and the first failure ends the build:
//
//      20  include paths    core, variant, every library's public folder
//      30  sketch           sources already laid out in the build dir
//      40  libraries        <build>/<library>/…
//      50  core + variant   <build>/, core objects appended to core.a
//      60  link             <name>.elf
//      ..  elf patch        optional, board-specific
//      70  eeprom           <name>.eep
//      80  flash image      <name>.hex
//      90  post-compile     optional notification script
// ─────────────────────────────────────────────────────────────────────────────

pub mod cache;
pub mod command;
pub mod sources;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::BuildConfiguration;
use crate::diagnostics::Translator;
use crate::error::{BuildError, Result};
use crate::hardware::HardwareLayout;
use crate::listener::{BuildListener, Silent};
use crate::runner::Runner;
use crate::sketch::{SourceMapper, Unmapped};

use cache::{needs_recompile, object_for, record_for};
use command::{CommandBuilder, CoreLink, LinkPlan, Toolchain};
use sources::{subdirs, IncludePathStack, LibraryLayout, SourceSet};

/// Inputs to a compile run.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Sketch folder; the elf patcher reads its `disk/` sub-folder.
    pub sketch_dir:   PathBuf,
    /// Holds the prepared sketch sources and receives every output.
    pub build_dir:    PathBuf,
    /// Output file stem (`<name>.elf`, `.hex`, `.eep`).
    pub project_name: String,
    /// Selected board id, handed to the post-compile script.
    pub board_id:     String,
    /// Imported library folders, in include order.
    pub libraries:    Vec<PathBuf>,
    pub verbose:      bool,
}

/// Outputs of a successful compile run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub elf:          PathBuf,
    pub hex:          PathBuf,
    pub eep:          PathBuf,
    pub core_archive: PathBuf,
    /// Sources handed to a compiler in this run.
    pub compiled:     usize,
    /// Sources whose object was reused.
    pub reused:       usize,
}

pub struct Compiler<'a> {
    config:   &'a BuildConfiguration,
    hardware: &'a dyn HardwareLayout,
    mapper:   &'a dyn SourceMapper,
    listener: &'a dyn BuildListener,
}

impl<'a> Compiler<'a> {
    pub fn new(config: &'a BuildConfiguration, hardware: &'a dyn HardwareLayout) -> Self {
        Self { config, hardware, mapper: &Unmapped, listener: &Silent }
    }

    pub fn with_mapper(mut self, mapper: &'a dyn SourceMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_listener(mut self, listener: &'a dyn BuildListener) -> Self {
        self.listener = listener;
        self
    }

    fn progress(&self, percent: u8, stage: &str) {
        debug!(percent, "{stage}");
        self.listener.progress(percent);
    }

    /// Run the full pipeline.
    pub fn compile(&self, req: &CompileRequest) -> Result<BuildOutput> {
        let core_id = self.config.get("build.core").ok_or_else(BuildError::no_board)?;
        let core_dir = self.hardware.core_dir(core_id)?;
        let variant_dir = self
            .config
            .get("build.variant")
            .map(|v| self.hardware.variant_dir(v))
            .transpose()?;

        let build_dir = &req.build_dir;
        create_dir(build_dir)?;

        let translator = Translator::new(build_dir, req.verbose, Some(core_id), self.mapper, self.listener);
        let tools = Toolchain::from_config(self.config, &self.hardware.toolchain_bin());
        let mut build = Build {
            runner:   Runner::new(&translator, self.listener, req.verbose),
            commands: CommandBuilder::new(self.config, tools, req.verbose),
            listener: self.listener,
            verbose:  req.verbose,
            compiled: 0,
            reused:   0,
        };

        // ── 1. include paths ──────────────────────────────────────────────
        self.progress(20, "include paths");
        let platform: IncludePathStack = std::iter::once(core_dir.clone())
            .chain(variant_dir.clone())
            .collect();
        let layouts: Vec<(&PathBuf, LibraryLayout)> = req
            .libraries
            .iter()
            .map(|lib| (lib, LibraryLayout::detect(lib)))
            .collect();
        let mut includes = platform.clone();
        for (_, layout) in &layouts {
            includes.push(layout.public_include());
        }

        // ── 2. sketch ─────────────────────────────────────────────────────
        self.progress(30, "sketch");
        let mut objects = build.compile_group(build_dir, includes.as_slice(), &SourceSet::scan(build_dir, false))?;
        translator.mark_sketch_compiled();

        // ── 3. libraries ──────────────────────────────────────────────────
        self.progress(40, "libraries");
        for (lib, layout) in &layouts {
            let out = build_dir.join(lib.file_name().unwrap_or_default());
            create_dir(&out)?;
            let compiled = match layout {
                LibraryLayout::Layered { src } => {
                    includes.scoped(src, |inc| build.compile_tree(src, &out, inc.as_slice()))?
                }
                LibraryLayout::Legacy { root, utility } => includes.scoped(utility, |inc| {
                    let mut objs = build.compile_group(&out, inc.as_slice(), &SourceSet::scan(root, false))?;
                    let utility_out = out.join("utility");
                    create_dir(&utility_out)?;
                    objs.extend(build.compile_group(&utility_out, inc.as_slice(), &SourceSet::scan(utility, false))?);
                    Ok::<_, BuildError>(objs)
                })?,
            };
            objects.extend(compiled);
        }

        // ── 4. core + variant ─────────────────────────────────────────────
        self.progress(50, "core");
        let core_objects = build.compile_group(build_dir, platform.as_slice(), &SourceSet::scan(&core_dir, true))?;
        if let Some(variant) = &variant_dir {
            objects.extend(build.compile_group(build_dir, platform.as_slice(), &SourceSet::scan(variant, true))?);
        }

        let core_archive = build_dir.join("core.a");
        for object in &core_objects {
            build.runner.run(&build.commands.archive(&core_archive, object))?;
        }

        // ── 5. link ───────────────────────────────────────────────────────
        self.progress(60, "link");
        let elf = build_dir.join(format!("{}.elf", req.project_name));
        let core = if self.config.is_set("build.noarchive") {
            CoreLink::Objects(&core_objects)
        } else {
            CoreLink::Archive(&core_archive)
        };
        build.runner.run(&build.commands.link(&LinkPlan {
            elf: &elf,
            objects: &objects,
            core,
            core_dir: &core_dir,
            build_dir,
        }))?;

        let tools_dir = self.hardware.tools_dir();
        if let Some(argv) = build.commands.elf_patch(&tools_dir, &elf, &req.sketch_dir) {
            build.runner.run(&argv)?;
        }

        // ── 6. eeprom + flash image ───────────────────────────────────────
        self.progress(70, "eeprom");
        let eep = build_dir.join(format!("{}.eep", req.project_name));
        build.runner.run(&build.commands.eeprom(&elf, &eep))?;

        self.progress(80, "hex");
        let hex = build_dir.join(format!("{}.hex", req.project_name));
        build.runner.run(&build.commands.hex(&elf, &hex))?;

        // ── 7. post-compile notification ──────────────────────────────────
        self.progress(90, "post-compile");
        if let Some(argv) = build.commands.post_compile(&tools_dir, &req.board_id, build_dir, &req.project_name) {
            build.runner.run_notify(&argv)?;
        }

        info!(compiled = build.compiled, reused = build.reused, elf = %elf.display(), "build finished");
        Ok(BuildOutput {
            elf,
            hex,
            eep,
            core_archive,
            compiled: build.compiled,
            reused: build.reused,
        })
    }
}

/// Per-build state shared by the compile stages.
struct Build<'b> {
    runner:   Runner<'b>,
    commands: CommandBuilder<'b>,
    listener: &'b dyn BuildListener,
    verbose:  bool,
    compiled: usize,
    reused:   usize,
}

impl Build<'_> {
    /// Compile one group into `out_dir`; returns every object, reused or not.
    fn compile_group(&mut self, out_dir: &Path, includes: &[PathBuf], sources: &SourceSet) -> Result<Vec<PathBuf>> {
        let mut objects = Vec::with_capacity(sources.len());

        // no dependency record for assembler output, always rebuilt
        for source in &sources.asm {
            let object = object_for(out_dir, source);
            self.runner.run(&self.commands.assembler(includes, source, &object))?;
            self.compiled += 1;
            objects.push(object);
        }

        let c = sources.c.iter().map(|s| (s, false));
        let cpp = sources.cpp.iter().map(|s| (s, true));
        for (source, is_cpp) in c.chain(cpp) {
            let object = object_for(out_dir, source);
            if needs_recompile(source, &object, &record_for(&object)) {
                let argv = if is_cpp {
                    self.commands.cpp(includes, source, &object)
                } else {
                    self.commands.c(includes, source, &object)
                };
                self.runner.run(&argv)?;
                self.compiled += 1;
            } else {
                if self.verbose {
                    self.listener.reused(&object);
                }
                self.reused += 1;
            }
            objects.push(object);
        }
        Ok(objects)
    }

    /// Compile `src_dir` and its sub-folders into a mirrored tree under `out_dir`.
    fn compile_tree(&mut self, src_dir: &Path, out_dir: &Path, includes: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut objects = self.compile_group(out_dir, includes, &SourceSet::scan(src_dir, false))?;
        for sub in subdirs(src_dir) {
            let out = out_dir.join(sub.file_name().unwrap_or_default());
            create_dir(&out)?;
            objects.extend(self.compile_tree(&sub, &out, includes)?);
        }
        Ok(objects)
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| BuildError::CreateDir {
        path: path.to_owned(),
        source,
    })
}
