//! `karna` – Karna delivery robot command line.
//!
//! One binary, three processes:
//!
//! - `karna coordinator` – serves the MQTT command topic, the compartment
//!   door and the terminal keypad.
//! - `karna display` – presentation host following the activity slot.
//! - `karna voice` – terminal voice assistant, the main producer of the
//!   activity slot.
//!
//! Configuration lives in `~/.karna/config.toml` and is written with
//! defaults on first run. Ctrl-C shuts every process down cleanly.

mod config;
mod coordinator;
mod display;
mod keypad;
mod voice;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use karna_middleware::ActivityChannel;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "karna")]
#[command(about = "Karna delivery robot")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.karna/config.toml)
    #[arg(short, long, env = "KARNA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve remote delivery commands and the compartment keypad
    Coordinator,
    /// Show the animation for the robot's current activity
    Display,
    /// Talk to the delivery assistant from the terminal
    Voice,
}

impl Commands {
    fn service_name(&self) -> &'static str {
        match self {
            Commands::Coordinator => "karna-coordinator",
            Commands::Display => "karna-display",
            Commands::Voice => "karna-voice",
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let telemetry = karna_runtime::init_tracing(cli.command.service_name());

    print_banner();

    let path = cli.config.clone().unwrap_or_else(config::config_path);
    let cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save_to(&cfg, &path) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            std::process::exit(2);
        }
    };
    info!(robot_id = %cfg.robot_id, config = ?cfg, "configuration ready");

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_tx.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(async {
        match cli.command {
            Commands::Coordinator => match coordinator::Coordinator::build(&cfg) {
                Ok(coordinator) => {
                    coordinator.run(shutdown_rx).await;
                    0
                }
                Err(e) => {
                    error!(error = %e, "coordinator could not start");
                    1
                }
            },
            Commands::Display => {
                let presenter = display::Presenter::new(&cfg.display.animations_dir, std::io::stdout());
                match display::run(
                    ActivityChannel::new(&cfg.activity_file),
                    presenter,
                    Duration::from_millis(cfg.display.poll_interval_ms.max(1)),
                    shutdown_rx,
                )
                .await
                {
                    Ok(()) => 0,
                    Err(e) => {
                        error!(error = %e, "display host failed");
                        1
                    }
                }
            }
            Commands::Voice => {
                voice::run(&cfg, shutdown_rx).await;
                0
            }
        }
    });

    // A pending terminal read would otherwise hold the runtime open.
    runtime.shutdown_timeout(Duration::from_secs(1));
    println!("{}", "  ✓ Karna stopped.".green());
    // `exit` skips destructors; flush pending spans first.
    drop(telemetry);
    std::process::exit(exit_code);
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __ __                     "#.bold().cyan());
    println!("{}", r#"  / //_/__ _________  ___ _ "#.bold().cyan());
    println!("{}", r#" / ,< / _ `/ __/ _ \/ _ `/ "#.bold().cyan());
    println!("{}", r#"/_/|_|\_,_/_/ /_//_/\_,_/  "#.bold().cyan());
    println!();
    println!("  {} {}",
        "Karna".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Autonomous Delivery Robot");
    println!();
}
