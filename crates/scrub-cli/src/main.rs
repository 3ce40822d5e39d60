//! `scrub` – ScrubNurse command line interface.
//!
//! 1. Loads `~/.scrubnurse/config.toml` (written with defaults on first run)
//!    and applies `SCRUB_*` overrides.
//! 2. With arguments, runs them as a single instruction and prints the
//!    cycle report as JSON:
//!
//!    ```text
//!    scrub "kiran, please stitch the wound"
//!    ```
//!
//! 3. Without arguments, prints the banner, probes the reasoning server and
//!    the arm controller, and drops into the interactive shell.
//! 4. Intercepts **Ctrl-C** to leave the shell cleanly.

mod config;
mod ollama;
mod repl;
mod session;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use scrub_types::CycleStatus;
use tracing::warn;

use crate::session::Session;

fn main() -> ExitCode {
    // Hold the guard until exit so pending spans are flushed.
    let _telemetry = scrub_runtime::init_tracing("scrubnurse");

    let instruction = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let one_shot = !instruction.trim().is_empty();

    if !one_shot {
        print_banner();
    }
    let cfg = load_config(one_shot);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start async runtime".red());
            return ExitCode::FAILURE;
        }
    };
    let session = Session::new(cfg);

    if one_shot {
        return run_once(&session, &rt, &instruction);
    }

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – leaving ScrubNurse …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    probe_services(&session, &rt);

    println!();
    println!("  Type an instruction, or {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&session, &rt, shutdown);
    ExitCode::SUCCESS
}

fn run_once(session: &Session, rt: &tokio::runtime::Runtime, instruction: &str) -> ExitCode {
    let report = rt.block_on(session.pipeline.process_instruction(instruction));
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("{}: {e}", "Failed to encode report".red());
            return ExitCode::FAILURE;
        }
    }
    if report.status == CycleStatus::Failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup
// ─────────────────────────────────────────────────────────────────────────────

/// Config from disk, or defaults (saved for next time) on first run.
/// `quiet` keeps stdout clean for one-shot JSON output.
fn load_config(quiet: bool) -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            if !quiet {
                println!(
                    "  Config loaded from {}",
                    config::config_path().display().to_string().bold()
                );
            }
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) if !quiet => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Ok(()) => {}
                Err(e) => eprintln!("{}: {e}", "Error saving config".red()),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            eprintln!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn probe_services(session: &Session, rt: &tokio::runtime::Runtime) {
    let cfg = &session.config;
    if cfg.llm_provider == scrub_runtime::LlmProvider::Ollama {
        print!("\n  Probing Ollama at {} … ", cfg.llm_url.dimmed());
        std::io::Write::flush(&mut std::io::stdout()).ok();
        match rt.block_on(ollama::fetch_models(&cfg.llm_url)) {
            Ok(models) => {
                println!("{} ({} model(s) available)", "online".green(), models.len());
                if !ollama::has_model(&models, &cfg.llm_model) {
                    println!(
                        "  {} Model {} is not pulled. Run `{}`.",
                        "!".yellow().bold(),
                        cfg.llm_model.bold(),
                        format!("ollama pull {}", cfg.llm_model).bold()
                    );
                }
            }
            Err(_) => {
                println!("{}", "offline".yellow());
                println!(
                    "  {}  Run `{}` to start a local model.",
                    "No Ollama instance detected.".dimmed(),
                    "ollama serve".bold()
                );
            }
        }
    } else {
        println!(
            "\n  Reasoning via {} ({})",
            cfg.llm_provider.to_string().bold(),
            cfg.llm_model
        );
    }

    let device = session.device_status();
    if device.enabled {
        print!("  Probing arm controller at {} … ", device.address.dimmed());
        std::io::Write::flush(&mut std::io::stdout()).ok();
        let probe = rt.block_on(session.pipeline.probe());
        if probe.reachable {
            println!("{}", "online".green());
        } else {
            println!("{} – {}", "unreachable".red(), probe.message.dimmed());
        }
    } else {
        println!("  Arm controller {}", "disabled (commands are simulated)".yellow());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____                 __   _  __                 "#.bold().cyan());
    println!("{}", r#"  / __/__________ _____/ /  / |/ /_ _________ ___ "#.bold().cyan());
    println!("{}", r#" _\ \/ __/ __/ // / _  /  /    / // / __(_-</ -_)"#.bold().cyan());
    println!("{}", r#"/___/\__/_/  \_,_/_.__/  /_/|_/\_,_/_/ /___/\__/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "ScrubNurse".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Voice-driven surgical instrument assistant");
    println!();
}
