//! `pipe-manager`: runs the bundled echo problem as an interactive manager.
//!
//! The orchestrator starts the manager with the paths of its control pipes
//! (negotiated mode) or of the instance pipes themselves (fixed mode). The
//! verdict goes to stderr and stdout; see [`pipe_manager::core::verdict`].

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pipe_manager::echo::EchoProblem;
use pipe_manager::error::SessionError;
use pipe_manager::exit_codes;
use pipe_manager::io::config::{ManagerConfig, load_config, render_config};
use pipe_manager::io::registry::InstancePaths;
use pipe_manager::logging;
use pipe_manager::session::{SessionBuilder, run_session};

#[derive(Parser)]
#[command(
    name = "pipe-manager",
    version,
    about = "Manager side of the interactive judging pipe protocol"
)]
struct Cli {
    /// Manager config (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "manager.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Negotiate instances over the control pipes and run the echo problem.
    Echo {
        /// Pipe the manager writes to the orchestrator.
        control_out: String,
        /// Pipe the manager reads from the orchestrator.
        control_in: String,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run the echo problem on instance pipes given as (inbound, outbound) pairs.
    EchoFixed {
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Validate the config and print it with defaults filled in.
    CheckConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Kill-request pipe.
    #[arg(long, requires = "confirm")]
    kill: Option<String>,
    /// Kill-confirmation pipe.
    #[arg(long, requires = "kill")]
    confirm: Option<String>,
    /// Problem input; stdin if omitted.
    #[arg(long)]
    input: Option<PathBuf>,
}

enum Mode {
    Negotiated { control_out: String, control_in: String },
    Fixed(Vec<InstancePaths>),
}

fn main() {
    let code = match run() {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<SessionError>() {
        Some(session) if session.is_fatal() => exit_codes::PROTOCOL,
        _ => exit_codes::INVALID,
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Echo {
            control_out,
            control_in,
            run,
        } => cmd_echo(
            &cli.config,
            Mode::Negotiated {
                control_out,
                control_in,
            },
            run,
        ),
        Command::EchoFixed { paths, run } => {
            let paths = InstancePaths::from_flat(&paths)?;
            cmd_echo(&cli.config, Mode::Fixed(paths), run)
        }
        Command::CheckConfig => cmd_check_config(&cli.config),
    }
}

fn cmd_echo(config_path: &Path, mode: Mode, run: RunArgs) -> Result<()> {
    let config = load_config(config_path)?;
    logging::init(config.log_file.as_deref(), config.trace)?;

    let input = read_input(run.input.as_deref())?;
    let problem = EchoProblem::parse(&input, &config.echo).context("parse echo input")?;

    let mut builder = SessionBuilder::new(config);
    if let (Some(kill), Some(confirm)) = (run.kill, run.confirm) {
        builder = builder.kill_switch(kill, confirm);
    }
    let session = match mode {
        Mode::Negotiated {
            control_out,
            control_in,
        } => builder.negotiate(&control_out, &control_in)?,
        Mode::Fixed(paths) => builder.fixed(paths)?,
    };
    run_session(session, |session| problem.run(session))?;
    Ok(())
}

fn cmd_check_config(config_path: &Path) -> Result<()> {
    let config: ManagerConfig = load_config(config_path)?;
    print!("{}", render_config(&config)?);
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read input {}", path.display()))
        }
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("read input from stdin")?;
            Ok(input)
        }
    }
}
