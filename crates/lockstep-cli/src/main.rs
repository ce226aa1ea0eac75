mod commands;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_LOCK_ERROR, EXIT_MANIFEST_ERROR};
use lockstep_core::{
    default_bin_dir, default_install_dir, install_signal_handler, Engine, InstallRequest,
};
use lockstep_runtime::tools::CONDA;
use lockstep_runtime::CONDA_LOCK;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "lockstep",
    version,
    about = "Reproducible multi-platform conda lock files for poetry projects"
)]
struct Cli {
    /// Path to the project manifest.
    #[arg(long, short = 'm', default_value = "pyproject.toml", global = true)]
    manifest: PathBuf,

    /// Solver used for locking (conda-lock or mock).
    #[arg(long, env = "LOCKSTEP_SOLVER", default_value = CONDA_LOCK, global = true)]
    solver: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Lock, install and update the development environment.
    Env {
        #[command(subcommand)]
        command: EnvCommand,
    },
    /// Lock, build and publish the package.
    Package {
        #[command(subcommand)]
        command: PackageCommand,
    },
    /// Change the [tool.lockstep] settings in the manifest.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Install applications from rich lock files.
    App {
        #[command(subcommand)]
        command: AppCommand,
    },
    /// Show the metadata of a combined, rich or plain lock file.
    LockInfo {
        /// Lock file to inspect.
        file: PathBuf,
        /// Package name to use when the lock does not embed one.
        #[arg(long)]
        package_name: Option<String>,
    },
    /// Check that the external tools lockstep delegates to are available.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct LockArgs {
    /// Target platform; repeat or comma-separate for several. Defaults to the
    /// manifest's env platforms.
    #[arg(
        long = "platform",
        short = 'p',
        visible_alias = "platforms",
        value_delimiter = ','
    )]
    platforms: Vec<String>,
    /// Channel replacing the manifest's conda-channels; repeat for several.
    #[arg(long = "channel", short = 'c')]
    channels: Vec<String>,
    /// Kill a platform's solver after this many seconds.
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum EnvCommand {
    /// Lock the environment for every platform.
    Lock {
        #[command(flatten)]
        lock: LockArgs,
        /// Leave dev-dependencies out of the lock.
        #[arg(long, default_value_t = false)]
        no_dev: bool,
    },
    /// Install the locked environment, locking first if needed.
    Sync {
        #[command(flatten)]
        lock: LockArgs,
        #[arg(long, default_value_t = false)]
        no_dev: bool,
    },
    /// Re-lock the environment and install it.
    Update {
        #[command(flatten)]
        lock: LockArgs,
        #[arg(long, default_value_t = false)]
        no_dev: bool,
    },
    /// Run a command inside the environment and exit with its status.
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Set a value, e.g. `env.platforms linux-64,osx-arm64`.
    Set { key: String, value: String },
    /// Remove a value, falling back to its default.
    Remove { key: String },
}

#[derive(Debug, Subcommand)]
enum AppCommand {
    /// Install an application into its own prefix and link its entry points.
    Install {
        /// Rich lock path or URL; {platform} is replaced by this host's platform.
        lock: String,
        /// Package name to use when the lock does not embed one.
        #[arg(long)]
        package_name: Option<String>,
        /// Entry point to link instead of those recorded in the lock; repeat for several.
        #[arg(long = "entry-point", short = 'e')]
        entry_points: Vec<String>,
        /// Directory holding one prefix per application.
        #[arg(long, env = "LOCKSTEP_APPS_DIR")]
        install_dir: Option<PathBuf>,
        /// Directory the entry points are linked into.
        #[arg(long, env = "LOCKSTEP_BIN_DIR")]
        bin_dir: Option<PathBuf>,
        /// Replace entry points that already exist in the bin directory.
        #[arg(long, default_value_t = false)]
        force: bool,
        #[arg(long, env = "LOCKSTEP_CONDA_PATH", default_value = CONDA)]
        conda: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum PackageCommand {
    /// Lock the package at its current version for every platform.
    Lock {
        #[command(flatten)]
        lock: LockArgs,
        /// Pin direct dependencies to a tested lock: a path, or a template
        /// containing {platform} naming one raw lock per platform.
        #[arg(long)]
        based_on_tested_lock: Option<String>,
    },
    /// Build the package.
    Build {
        /// Python version for the build when the manifest does not pin one.
        #[arg(long)]
        python_version: Option<String>,
    },
    /// Publish the built package.
    Publish {
        /// Repository to publish to; overrides the manifest.
        #[arg(long)]
        repository_url: Option<String>,
        #[arg(long, env = "LOCKSTEP_PUBLISH_USERNAME")]
        username: Option<String>,
        #[arg(long, env = "LOCKSTEP_PUBLISH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Build before publishing.
        #[arg(long, default_value_t = false)]
        build: bool,
        #[arg(long)]
        python_version: Option<String>,
    },
    /// Write one platform of the package lock as a standalone explicit lock.
    ExportLock {
        /// Combined lock to export from. Defaults to the package lock.
        #[arg(long)]
        lock_file: Option<PathBuf>,
        /// Platform to export. Defaults to this host's platform.
        #[arg(long)]
        platform: Option<String>,
        /// Output file.
        #[arg(long, short = 'o')]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LOCKSTEP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Env { command } => {
            load_engine(&cli.manifest, &cli.solver, timeout_of(&command))
                .and_then(|engine| commands::env::run(&engine, command.into(), json_output))
        }
        Commands::Package { command } => {
            load_engine(&cli.manifest, &cli.solver, package_timeout(&command))
                .and_then(|engine| commands::package::run(&engine, command.into(), json_output))
        }
        Commands::Config { command } => {
            commands::config::run(&cli.manifest, command.into(), json_output)
        }
        Commands::App {
            command: AppCommand::Install {
                lock,
                package_name,
                entry_points,
                install_dir,
                bin_dir,
                force,
                conda,
            },
        } => {
            let request = InstallRequest {
                package_name,
                entry_points,
                install_dir: install_dir.unwrap_or_else(default_install_dir),
                bin_dir: bin_dir.unwrap_or_else(default_bin_dir),
                conda,
                force,
                ..InstallRequest::new(lock)
            };
            commands::app::install(&request, json_output)
        }
        Commands::LockInfo { file, package_name } => {
            commands::lock_info::run(&file, package_name.as_deref(), json_output)
        }
        Commands::Doctor => commands::doctor::run(&cli.manifest, &cli.solver, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:") {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("lock error:") {
                EXIT_LOCK_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn load_engine(
    manifest: &std::path::Path,
    solver: &str,
    timeout: Option<u64>,
) -> Result<Engine, String> {
    tracing::debug!(manifest = %manifest.display(), solver, "loading project");
    Ok(Engine::from_manifest(manifest, solver)
        .map_err(|e| e.to_string())?
        .with_timeout(timeout.map(Duration::from_secs)))
}

fn timeout_of(command: &EnvCommand) -> Option<u64> {
    match command {
        EnvCommand::Lock { lock, .. }
        | EnvCommand::Sync { lock, .. }
        | EnvCommand::Update { lock, .. } => lock.timeout,
        EnvCommand::Run { .. } => None,
    }
}

fn package_timeout(command: &PackageCommand) -> Option<u64> {
    match command {
        PackageCommand::Lock { lock, .. } => lock.timeout,
        _ => None,
    }
}

impl From<LockArgs> for commands::LockSelection {
    fn from(args: LockArgs) -> Self {
        Self {
            platforms: args.platforms,
            channels: args.channels,
        }
    }
}

impl From<EnvCommand> for commands::env::Action {
    fn from(command: EnvCommand) -> Self {
        match command {
            EnvCommand::Lock { lock, no_dev } => Self::Lock {
                selection: lock.into(),
                include_dev: !no_dev,
            },
            EnvCommand::Sync { lock, no_dev } => Self::Sync {
                selection: lock.into(),
                include_dev: !no_dev,
            },
            EnvCommand::Update { lock, no_dev } => Self::Update {
                selection: lock.into(),
                include_dev: !no_dev,
            },
            EnvCommand::Run { args } => Self::Run { args },
        }
    }
}

impl From<ConfigCommand> for commands::config::Action {
    fn from(command: ConfigCommand) -> Self {
        match command {
            ConfigCommand::Set { key, value } => Self::Set { key, value },
            ConfigCommand::Remove { key } => Self::Remove { key },
        }
    }
}

impl From<PackageCommand> for commands::package::Action {
    fn from(command: PackageCommand) -> Self {
        match command {
            PackageCommand::Lock {
                lock,
                based_on_tested_lock,
            } => Self::Lock {
                selection: lock.into(),
                baseline: based_on_tested_lock,
            },
            PackageCommand::Build { python_version } => Self::Build { python_version },
            PackageCommand::Publish {
                repository_url,
                username,
                password,
                build,
                python_version,
            } => Self::Publish {
                repository_url,
                username,
                password,
                build,
                python_version,
            },
            PackageCommand::ExportLock {
                lock_file,
                platform,
                output,
            } => Self::ExportLock {
                lock_file,
                platform,
                output,
            },
        }
    }
}
