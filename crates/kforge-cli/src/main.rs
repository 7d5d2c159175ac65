mod commands;
mod notifier;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Host, EXIT_BUSY, EXIT_FAILURE};
use kforge_core::Settings;
use kforge_runtime::{check_build_tools, format_missing, Elevation};
use kforge_schema::ProfileId;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kforge",
    version,
    about = "Download, configure, build and install Linux kernels from kernel.org"
)]
struct Cli {
    /// Settings file (default: ~/.config/kforge/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Build workspace directory (overrides the settings file).
    #[arg(long, global = true)]
    build_dir: Option<PathBuf>,

    /// Parallel compile jobs (overrides the settings file).
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// How to run privileged commands: auto, pkexec or sudo.
    #[arg(long, global = true)]
    elevation: Option<Elevation>,

    /// Do not send desktop notifications.
    #[arg(long, default_value_t = false, global = true)]
    no_notify: bool,

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
    /// List kernel releases published on kernel.org.
    Versions,
    /// Check whether a newer stable kernel than the running one exists.
    CheckUpdate,
    /// List the build profiles and what they change.
    Profiles {
        /// Show every configuration override.
        #[arg(long, default_value_t = false)]
        details: bool,
    },
    /// Show the detected distribution, bootloader and build readiness.
    Env,
    /// Install the build dependencies for this distribution.
    Deps {
        /// Do not ask for confirmation.
        #[arg(short, long, default_value_t = false)]
        yes: bool,
        /// Print the install command without running it.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Download, configure, build and install a kernel.
    Install {
        /// Kernel version (e.g. 6.12.4, 6.13-rc3) or "latest".
        #[arg(default_value = "latest")]
        version: String,
        /// Build profile: gaming, audio-video, minimal, hardware-optimized or custom.
        #[arg(short, long, default_value = "gaming")]
        profile: ProfileId,
        /// Name tag placed in the kernel release (default: custom).
        #[arg(long)]
        name: Option<String>,
        /// Delete the build workspace after a successful install.
        #[arg(long, default_value_t = false)]
        cleanup: bool,
    },
    /// List kernels installed by kforge.
    History,
    /// Uninstall a kernel installed by kforge.
    Remove {
        /// Kernel release as shown by `kforge history`.
        release: String,
        /// Do not ask for confirmation.
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },
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
            tracing_subscriber::EnvFilter::try_from_env("KFORGE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("build workspace is in use") {
                EXIT_BUSY
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, String> {
    let mut settings = Settings::load(cli.config.as_deref()).map_err(|e| e.to_string())?;
    if let Some(dir) = &cli.build_dir {
        settings.build_dir.clone_from(dir);
    }
    if let Some(jobs) = cli.jobs {
        settings.jobs = Some(jobs);
    }
    if let Some(elevation) = cli.elevation {
        settings.elevation = elevation;
    }
    Ok(settings)
}

fn run(cli: &Cli) -> Result<u8, String> {
    let json = cli.json;
    let host = || load_settings(cli).map(|settings| Host::detect(settings, !cli.no_notify));
    match &cli.command {
        Commands::Versions => {
            let host = host()?;
            commands::versions::run(&host.settings.remote_config(), &host.running_release(), json)
        }
        Commands::CheckUpdate => {
            let host = host()?;
            commands::check_update::run(
                &host.settings.remote_config(),
                &host.running_release(),
                host.notifier().as_ref(),
                json,
            )
        }
        Commands::Profiles { details } => {
            commands::profiles::run(&host()?.catalog(), *details, json)
        }
        Commands::Env => commands::env::run(&host()?, json),
        Commands::Deps { yes, dry_run } => commands::deps::run(&host()?, *yes, *dry_run, json),
        Commands::Install {
            version,
            profile,
            name,
            cleanup,
        } => {
            let host = host()?;
            if std::env::var("KFORGE_SKIP_PREREQS").as_deref() != Ok("1") {
                let missing = check_build_tools(&host.env, &host.tools);
                if !missing.is_empty() {
                    return Err(format_missing(&missing));
                }
            }
            commands::install::run(
                &host,
                &commands::install::InstallArgs {
                    version,
                    profile: *profile,
                    name_tag: name.as_deref(),
                    cleanup: *cleanup,
                },
                json,
            )
        }
        Commands::History => {
            let host = host()?;
            let catalog = host.catalog();
            commands::history::run(&host.history(&catalog), &host.running_release(), json)
        }
        Commands::Remove { release, yes } => {
            commands::remove::run(&host()?, release, *yes, json)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(*shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(dir),
    }
}
