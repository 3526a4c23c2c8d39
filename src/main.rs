// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build  —  Arduino sketch build pipeline
//
//  Compiles a sketch, its libraries and the board core with the board's own
//  toolchain, reusing every object whose dependency record is still valid.
//
//  USAGE
//  ─────
//    tsuki-build compile --boards boards.toml --board uno --hardware /opt/arduino/hardware \
//                        --sketch Blink --build-dir /tmp/build/Blink
//    tsuki-build headers ~/Arduino/libraries/Servo
//    tsuki-build boards  --boards boards.toml
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use tsuki_build::compile::sources::header_list;
use tsuki_build::{build_sketch, BuildConfiguration, BuildError, BuildListener, CompileRequest, HardwareTree};

// ─────────────────────────────────────────────────────────────────────────────
//  CLI definition (clap derive)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "tsuki-build",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Arduino sketch build pipeline: incremental compile, link, and diagnostics",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Suppress compiler output and the summary
    #[arg(long, global = true)]
    quiet: bool,

    /// Print every tool command, raw compiler output, and debug logs
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Compile a sketch to .elf / .hex / .eep
    Compile(CompileArgs),
    /// List the headers a library exposes
    Headers {
        /// Library folder
        library: PathBuf,
    },
    /// List the board ids defined in a board file
    Boards {
        #[arg(long)]
        boards: PathBuf,
    },
}

// ── Compile ───────────────────────────────────────────────────────────────────

#[derive(Args)]
struct CompileArgs {
    /// Board definitions (TOML, one table per board id)
    #[arg(long)]
    boards: PathBuf,

    /// Target board ID  (e.g. uno, mega2560, teensy31)
    #[arg(long, short = 'b')]
    board: String,

    /// Hardware folder holding provider platforms and tools/
    #[arg(long)]
    hardware: PathBuf,

    /// Platform folder bare core / variant ids resolve against
    #[arg(long, default_value = "arduino")]
    provider: String,

    /// Directory holding the compiler binaries  (default: hardware/tools/avr/bin, else PATH)
    #[arg(long)]
    toolchain: Option<PathBuf>,

    /// Sketch folder (.ino / .pde tabs)
    #[arg(long)]
    sketch: PathBuf,

    /// Output directory for .o, .d, .elf, .hex, .eep files
    #[arg(long)]
    build_dir: PathBuf,

    /// Output file stem  (default: primary sketch tab name)
    #[arg(long)]
    name: Option<String>,

    /// Imported library folders  (comma-separated or repeated)
    #[arg(long, value_delimiter = ',')]
    library: Vec<PathBuf>,

    /// Override a build parameter, e.g. --set build.f_cpu=8000000L
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
//  Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    init_tracing(cli.verbose);

    let result = match cli.command {
        Cmd::Compile(args)      => cmd_compile(args, cli.verbose, cli.quiet),
        Cmd::Headers { library } => cmd_headers(&library),
        Cmd::Boards { boards }   => cmd_boards(&boards),
    };

    if let Err(e) = result {
        if let Some(line) = failure_line(&e) {
            eprintln!("{line}");
        }
        std::process::exit(1);
    }
}

/// A failure whose details `render_compile_error` already printed.
#[derive(Debug)]
struct Rendered;

impl std::fmt::Display for Rendered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("compilation failed")
    }
}

impl std::error::Error for Rendered {}

/// The closing `✗` line, unless the error block was already shown.
fn failure_line(e: &anyhow::Error) -> Option<String> {
    (!e.is::<Rendered>()).then(|| format!("{} {:#}", "✗".red().bold(), e))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ─────────────────────────────────────────────────────────────────────────────
//  Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_compile(args: CompileArgs, verbose: bool, quiet: bool) -> anyhow::Result<()> {
    let config = BuildConfiguration::load(&args.boards, &args.board)
        .with_context(|| format!("loading board '{}' from {}", args.board, args.boards.display()))?
        .with_overrides(args.overrides.iter().map(String::as_str))?;

    let mut hardware = HardwareTree::new(&args.hardware, &args.provider);
    if let Some(bin) = &args.toolchain {
        hardware = hardware.with_toolchain_bin(bin);
    }

    let name = args.name.clone().unwrap_or_else(|| dir_name(&args.sketch));

    if !quiet {
        println!(
            "{} {} {}",
            "Compiling".cyan().bold(),
            format!("[board: {}]", args.board).dimmed(),
            format!("[core: {}]", config.get("build.core").unwrap_or("—")).dimmed(),
        );
        println!("{}", "─".repeat(60).dimmed());
    }

    let t0 = Instant::now();
    let req = CompileRequest {
        sketch_dir:   args.sketch,
        build_dir:    args.build_dir,
        project_name: name,
        board_id:     args.board,
        libraries:    args.library,
        verbose,
    };

    match build_sketch(&config, &hardware, &req, &Console { quiet }) {
        Ok(out) => {
            if !quiet {
                println!(
                    "{} compiled in {:.2}s  {}",
                    "✓".green().bold(),
                    t0.elapsed().as_secs_f64(),
                    format!("({} compiled, {} reused)", out.compiled, out.reused).dimmed(),
                );
                println!("  {} {}", "hex:".dimmed(), out.hex.display());
                println!("  {} {}", "eep:".dimmed(), out.eep.display());
            }
            Ok(())
        }
        Err(e) => {
            render_compile_error(&e);
            Err(Rendered.into())
        }
    }
}

fn cmd_headers(library: &Path) -> anyhow::Result<()> {
    let headers = header_list(library)
        .with_context(|| format!("reading headers of {}", library.display()))?;
    for h in headers {
        println!("{h}");
    }
    Ok(())
}

fn cmd_boards(boards: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(boards)
        .with_context(|| format!("reading {}", boards.display()))?;
    for id in BuildConfiguration::boards_in(&text) {
        let name = BuildConfiguration::from_toml_str(&text, &id, boards)
            .ok()
            .and_then(|c| c.get("name").map(str::to_owned))
            .unwrap_or_default();
        println!("{:<15} {}", id.bold(), name.dimmed());
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
//  Live output
// ─────────────────────────────────────────────────────────────────────────────

struct Console {
    quiet: bool,
}

impl BuildListener for Console {
    fn command(&self, argv: &[String]) {
        println!("{}", argv.join(" ").dimmed());
    }

    fn output(&self, text: &str) {
        if self.quiet {
            return;
        }
        for line in text.lines() {
            if line.contains("error:") {
                eprintln!("  {}", line.red());
            } else if line.contains("warning:") {
                eprintln!("  {}", line.yellow());
            } else if !line.trim().is_empty() {
                eprintln!("  {}", line.dimmed());
            }
        }
    }

    fn reused(&self, object: &Path) {
        println!("{} {}", "Using previously compiled:".dimmed(), object.display());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "sketch".into())
}

// ─────────────────────────────────────────────────────────────────────────────
//  Error rendering
// ─────────────────────────────────────────────────────────────────────────────

fn render_compile_error(e: &BuildError) {
    eprintln!("\n{} {}", "CompileError".red().bold(), "compilation failed");
    eprintln!("{}", "─".repeat(60).dimmed());

    match e {
        BuildError::Compile(d) => {
            match &d.location {
                Some(loc) => eprintln!(
                    "  {} {}",
                    format!("{}:{}:", loc.file, loc.line + 1).bold(),
                    d.headline().red()
                ),
                None => eprintln!("  {}", d.headline().red()),
            }
            if let Some(note) = &d.note {
                for line in note.lines() {
                    eprintln!("  {}", line.dimmed());
                }
            }
        }
        BuildError::ToolInvocation { program, source } => {
            eprintln!("  {} cannot run {}: {}", "✗".red(), program.bold(), source);
            eprintln!("  Point {} at the compiler binaries or put them on PATH", "--toolchain".bold());
        }
        BuildError::Configuration(msg) => {
            eprintln!("  {} {}", "✗".red(), msg);
        }
        _ => eprintln!("  {}", e),
    }

    eprintln!("{}", "─".repeat(60).dimmed());
}
