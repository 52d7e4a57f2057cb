use std::path::{Path, PathBuf};
use std::process::ExitCode;

use trapmine::config::SessionConfig;
use trapmine::debugger::Debugger;
use trapmine::errors::DebuggerError;
use trapmine::ui::cli::CliUi;

use clap::Parser;
use tracing::{debug, error};

/// Launch a program under the trapmine debugger
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The program to launch as debuggee, looked up in PATH if it is not a path
    program: Option<PathBuf>,

    /// Arguments for the debuggee
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Maximum number of breakpoints that can be set at the same time
    #[clap(long, default_value_t = trapmine::config::DEFAULT_BREAKPOINT_CAPACITY)]
    max_breakpoints: usize,

    /// Keep address space randomization enabled for the debuggee
    #[clap(long)]
    aslr: bool,

    /// Print every response as one JSON object per line
    #[clap(long)]
    json: bool,

    /// More logging on stderr, repeat for more
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    human_panic::setup_panic!();
    let args = Args::parse();
    setup_logger(args.verbose);
    debug!("set up the logger");

    let Some(program) = args.program.as_ref() else {
        eprintln!("Usage: tm [OPTIONS] <PROGRAM> [ARGS]...");
        return ExitCode::FAILURE;
    };
    let program = match resolve(program) {
        Ok(p) => p,
        Err(e) => {
            error!("{e}");
            eprintln!("tm: {}: {e}", program.display());
            return ExitCode::FAILURE;
        }
    };

    let config = SessionConfig {
        breakpoint_capacity: args.max_breakpoints,
        disable_aslr: !args.aslr,
        ..Default::default()
    };

    match run(&program, &args.args, args.json, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("tm: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    program: &Path,
    debuggee_args: &[String],
    json: bool,
    config: SessionConfig,
) -> Result<(), DebuggerError> {
    let ui = CliUi::build(json)?;
    let mut debug: Debugger<CliUi> = Debugger::build(ui, config);
    debug.launch_debuggee(program, debuggee_args)?;
    debug.run_debugger()?;
    Ok(())
}

/// Paths are taken as they are, bare names are searched in PATH
fn resolve(program: &Path) -> Result<PathBuf, DebuggerError> {
    if program.exists() || program.components().count() > 1 {
        return Ok(program.to_path_buf());
    }
    Ok(which::which(program)?)
}

fn setup_logger(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("could not set up the logger: {e}");
    }
}
