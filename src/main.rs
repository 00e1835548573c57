//! Codex Bridge - Run the Codex CLI as a cancellable stream of structured events.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use codex_bridge::config::{BridgeConfig, ConfigLoader};
use codex_bridge::display;
use codex_bridge::exec::{Bridge, Event, ExecError, SandboxMode};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SandboxArg {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl From<SandboxArg> for SandboxMode {
    fn from(arg: SandboxArg) -> Self {
        match arg {
            SandboxArg::ReadOnly => SandboxMode::ReadOnly,
            SandboxArg::WorkspaceWrite => SandboxMode::WorkspaceWrite,
            SandboxArg::DangerFullAccess => SandboxMode::DangerFullAccess,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "codex-bridge",
    about = "Run the Codex CLI as a cancellable stream of structured events",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one Codex task and stream its events.
    Exec {
        /// The prompt to send.
        prompt: String,
        /// Model to use.
        #[arg(short, long)]
        model: Option<String>,
        /// Sandbox policy for agent commands.
        #[arg(short, long, value_enum)]
        sandbox: Option<SandboxArg>,
        /// Working directory for the agent.
        #[arg(long = "cd")]
        cd: Option<PathBuf>,
        /// Image to attach (repeatable).
        #[arg(long = "image")]
        images: Vec<PathBuf>,
        /// Configuration override KEY=VALUE (repeatable).
        #[arg(short = 'c', long = "config-override", value_parser = parse_key_value)]
        overrides: Vec<(String, String)>,
        /// Allow running outside a git repository.
        #[arg(long)]
        skip_git_repo_check: bool,
        /// Run without approval prompts.
        #[arg(long)]
        full_auto: bool,
        /// Codex binary to run.
        #[arg(long)]
        binary: Option<PathBuf>,
        /// Render events for humans instead of JSON lines.
        #[arg(long)]
        pretty: bool,
        /// Do not truncate long values in pretty output.
        #[arg(long)]
        raw: bool,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<BridgeConfig, codex_bridge::config::ConfigError> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    loader.load()
}

fn exit_code_for(err: &ExecError) -> ExitCode {
    match err {
        ExecError::Cancelled => ExitCode::from(130),
        ExecError::Exit { code } => ExitCode::from(u8::try_from(*code).unwrap_or(1)),
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Exec {
            prompt,
            model,
            sandbox,
            cd,
            images,
            overrides,
            skip_git_repo_check,
            full_auto,
            binary,
            pretty,
            raw,
        } => {
            if let Some(binary) = binary {
                config.binary = binary;
            }

            let mut options = config
                .defaults
                .options(prompt)
                .skip_git_repo_check(skip_git_repo_check || config.defaults.skip_git_repo_check)
                .full_auto(full_auto || config.defaults.full_auto);
            if let Some(model) = model {
                options = options.model(model);
            }
            if let Some(sandbox) = sandbox {
                options = options.sandbox(sandbox.into());
            }
            if let Some(dir) = cd {
                options = options.working_dir(dir);
            }
            for image in images {
                options = options.image(image);
            }
            for (key, value) in overrides {
                options = options.config_override(key, value);
            }

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, cancelling run");
                    ctrl_c.cancel();
                }
            });

            let bridge = Bridge::from_config(&config);
            tracing::info!(binary = %bridge.binary().display(), "Starting Codex run");

            let mut stream = bridge.run::<Event>(&options, cancel);
            let mut result = Ok(());
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) if pretty => display::print_event(&event, raw),
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
                    },
                    Err(err) => result = Err(err),
                }
            }

            if pretty {
                display::print_run_end(&result);
            }
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    if !pretty {
                        eprintln!("{err}");
                    }
                    exit_code_for(&err)
                }
            }
        }
    }
}
