mod console;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use termpanel_core::config::AppConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "termpanel",
    about = "Run a shell under a PTY helper with an out-of-band resize channel",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/termpanel/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach this terminal to a new shell session (default)
    Run {
        /// Shell to run instead of $SHELL
        #[arg(short, long)]
        shell: Option<PathBuf>,
        /// Starting directory instead of $HOME
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Command to type into the shell once it has started
        #[arg(short = 'e', long)]
        command: Option<String>,
        /// Append a JSON-lines transcript of the session to this file
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// PTY helper process, launched by a session with fd 3 as control channel
    #[command(hide = true)]
    PtyHelper {
        /// Shell to exec inside the PTY
        shell: PathBuf,
    },

    /// List shells found on this system
    Shells,

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print config file path
    Path,
}

enum LogSink<'a> {
    Stderr,
    File(&'a Path),
}

fn init_tracing(verbose: bool, sink: LogSink<'_>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "termpanel=info,termpanel_core=info,termpanel_pty=info,warn".into()
        }))
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match sink {
        LogSink::Stderr => builder.with_writer(std::io::stderr).init(),
        LogSink::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder.with_writer(Mutex::new(file)).with_ansi(false).init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The helper runs before any runtime exists so nothing else can be
    // allocated on fd 3. It must not touch config or stdout.
    if let Some(Commands::PtyHelper { shell }) = &cli.command {
        init_tracing(cli.verbose, LogSink::Stderr)?;
        let code = termpanel_pty::helper::run(shell)?;
        std::process::exit(code);
    }

    tokio::runtime::Runtime::new()?.block_on(run_cli(cli))
}

async fn run_cli(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Some(Commands::Run {
            shell,
            cwd,
            command,
            record,
        }) => {
            if shell.is_some() {
                config.shell.program = shell;
            }
            if cwd.is_some() {
                config.shell.cwd = cwd;
            }
            if command.is_some() {
                config.terminal.initial_command = command;
            }
            run_session(cli.verbose, config, record).await
        }
        None => run_session(cli.verbose, config, None).await,
        Some(Commands::Shells) => {
            init_tracing(cli.verbose, LogSink::Stderr)?;
            list_shells();
            Ok(())
        }
        Some(Commands::Config { action }) => {
            init_tracing(cli.verbose, LogSink::Stderr)?;
            handle_config_command(action, &config)
        }
        Some(Commands::PtyHelper { .. }) => unreachable!("handled above"),
    }
}

async fn run_session(verbose: bool, config: AppConfig, record: Option<PathBuf>) -> Result<()> {
    // stdout belongs to the shell, so logs go to a file.
    let log_file = config.log_file();
    init_tracing(verbose, LogSink::File(&log_file))?;
    tracing::info!(log = %log_file.display(), "Starting termpanel session");

    let code = console::run(config, record).await?;
    tracing::info!(code, "Session finished");
    // stdin is still being read on a blocking thread; exit instead of
    // waiting for the runtime to shut down.
    std::process::exit(code);
}

fn list_shells() {
    let default = termpanel_pty::default_shell();
    for shell in termpanel_pty::detect_available_shells() {
        let marker = match &default {
            Some(d) if d.path == shell.path => "*",
            _ => " ",
        };
        println!("{} {:<16} {:<20} {}", marker, shell.id, shell.name, shell.path.display());
    }
    if let Some(d) = default {
        println!("\ndefault: {}", d.path.display());
    }
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                config.save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
