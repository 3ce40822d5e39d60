//! REPL – the interactive ScrubNurse shell.
//!
//! Free text is treated as a spoken instruction and runs one cycle.
//! Slash-commands:
//!   /status                        – configuration and device summary
//!   /probe                         – reasoning server and device connectivity
//!   /mappings                      – current action → command table
//!   /map <action> <code0> [code1]  – register or replace a mapping
//!   /prompt [profile]              – show or switch the prompt profile
//!   /selftest                      – probe + test detection + canned cycle
//!   /help                          – show this list
//!   /quit | /exit                  – leave the shell

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use scrub_runtime::{LlmProvider, PromptProfile};
use scrub_types::{CycleReport, CycleStatus, DetectionResult, DispatchErrorKind, SurgicalAction};
use tokio::runtime::Runtime;

use crate::ollama;
use crate::session::Session;

/// Instruction used by `/selftest`.
pub const SELFTEST_INSTRUCTION: &str = "sharath, start the incision";

/// One parsed line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Instruction(String),
    Status,
    Probe,
    Mappings,
    Map {
        action: SurgicalAction,
        without_object: String,
        with_object: Option<String>,
    },
    Prompt(Option<PromptProfile>),
    SelfTest,
    Help,
    Quit,
    Empty,
    /// Malformed slash-command, with the message to show.
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Instruction(line.to_string());
    }

    let mut words = line.split_whitespace();
    let head = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();
    match (head, args.as_slice()) {
        ("/status", []) => Command::Status,
        ("/probe", []) => Command::Probe,
        ("/mappings", []) => Command::Mappings,
        ("/map", [action, code0, rest @ ..]) if rest.len() <= 1 => match SurgicalAction::parse(action) {
            Some(action) => Command::Map {
                action,
                without_object: code0.to_string(),
                with_object: rest.first().map(|c| c.to_string()),
            },
            None => Command::Invalid("action name must not be blank".into()),
        },
        ("/map", _) => Command::Invalid("usage: /map <action> <code0> [code1]".into()),
        ("/prompt", []) => Command::Prompt(None),
        ("/prompt", [name]) => match PromptProfile::parse(name) {
            Some(p) => Command::Prompt(Some(p)),
            None => Command::Invalid(format!(
                "unknown profile '{name}' (default / detailed / conservative)"
            )),
        },
        ("/selftest", []) => Command::SelfTest,
        ("/help", _) => Command::Help,
        ("/quit" | "/exit", _) => Command::Quit,
        (other, _) => Command::Invalid(format!("unknown command '{other}'")),
    }
}

/// Entry point for the interactive shell.
///
/// `shutdown` is polled each iteration; when set the shell exits cleanly.
pub fn run(session: &Session, rt: &Runtime, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("{}: {e}", "Cannot open terminal".red());
            return;
        }
    };

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline(&format!("{} ", "scrub>".bold().cyan())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {e}", "Read error".red());
                break;
            }
        };
        if !line.trim().is_empty() {
            let _ = editor.add_history_entry(line.as_str());
        }

        match parse_command(&line) {
            Command::Empty => {}
            Command::Instruction(text) => {
                let report = rt.block_on(session.pipeline.process_instruction(&text));
                print_report(&report);
            }
            Command::Status => cmd_status(session),
            Command::Probe => cmd_probe(session, rt),
            Command::Mappings => cmd_mappings(session),
            Command::Map {
                action,
                without_object,
                with_object,
            } => cmd_map(session, action, &without_object, with_object.as_deref()),
            Command::Prompt(profile) => cmd_prompt(session, profile),
            Command::SelfTest => cmd_selftest(session, rt),
            Command::Help => cmd_help(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Invalid(msg) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                msg,
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "ScrubNurse Commands".bold().underline());
    println!("  {}                    – run one instruction cycle", "<text>".bold().cyan());
    println!("  {}                   – configuration summary", "/status".bold().cyan());
    println!("  {}                    – connectivity check", "/probe".bold().cyan());
    println!("  {}                 – show the command table", "/mappings".bold().cyan());
    println!("  {} – add or replace a mapping", "/map <action> <c0> [c1]".bold().cyan());
    println!("  {}         – show or switch prompt profile", "/prompt [profile]".bold().cyan());
    println!("  {}                 – probe + detection + canned cycle", "/selftest".bold().cyan());
    println!("  {}              – exit the shell", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(session: &Session) {
    let cfg = &session.config;
    let perception = session.pipeline.perception().configuration();
    let device = session.device_status();

    println!("{}", "Status".bold().underline());
    println!(
        "  Reasoning : {} {} at {} (profile {})",
        cfg.llm_provider.to_string().yellow(),
        session.driver.model().bold(),
        session.driver.base_url().dimmed(),
        session.driver.profile().to_string().yellow()
    );
    if session.pipeline.camera_enabled() {
        println!("  Camera    : {} ({})", "enabled".green(), cfg.camera_frame_path.display());
    } else {
        println!("  Camera    : {}", "disabled (simulated perception)".yellow());
    }
    println!(
        "  Detection : mode {}, height {}±{} cm, distance {}±{} cm, {} px/cm",
        perception.mode.to_string().yellow(),
        perception.target_height_cm,
        perception.height_tolerance_cm,
        perception.target_distance_cm,
        perception.distance_tolerance_cm,
        perception
            .pixels_per_cm
            .map_or_else(|| "uncalibrated".to_string(), |p| p.to_string())
    );
    println!(
        "  Colour    : {} – {}",
        perception.color_range.lower, perception.color_range.upper
    );
    if device.enabled {
        println!(
            "  Device    : {} at {} (timeout {:?})",
            "enabled".green(),
            device.address.bold(),
            device.timeout
        );
    } else {
        println!("  Device    : {}", "disabled (simulated dispatch)".yellow());
    }
    let operators: Vec<String> = session
        .pipeline
        .normalizer()
        .operators()
        .iter()
        .map(|op| format!("{} ({})", op.name, op.handedness))
        .collect();
    println!("  Operators : {}", operators.join(", "));
    println!("  Timeout   : {:?} per stage", session.pipeline.config().stage_timeout);
}

fn cmd_probe(session: &Session, rt: &Runtime) {
    println!("{}", "Connectivity".bold().underline());

    if session.config.llm_provider == LlmProvider::Ollama {
        print!("  Ollama at {} … ", session.driver.base_url().dimmed());
        io::stdout().flush().ok();
        match rt.block_on(ollama::fetch_models(session.driver.base_url())) {
            Ok(models) if ollama::has_model(&models, session.driver.model()) => {
                println!("{} ({} model(s))", "online".green(), models.len());
            }
            Ok(_) => println!(
                "{} but model {} is not pulled. Try: ollama pull {}",
                "online".yellow(),
                session.driver.model().bold(),
                session.driver.model()
            ),
            Err(e) => println!("{} – {}", "offline".red(), e.dimmed()),
        }
    } else {
        println!(
            "  {} at {} (hosted; checked on first instruction)",
            session.config.llm_provider.to_string().yellow(),
            session.driver.base_url().dimmed()
        );
    }

    let probe = rt.block_on(session.pipeline.probe());
    let label = match (probe.reachable, probe.error_kind) {
        (true, Some(DispatchErrorKind::Disabled)) => "simulated".yellow(),
        (true, _) => "reachable".green(),
        (false, _) => "unreachable".red(),
    };
    println!("  Device    … {} – {}", label, probe.message.dimmed());
}

fn cmd_mappings(session: &Session) {
    let table = session.pipeline.command_table();
    let table = table.read();
    println!("{}", "Command table".bold().underline());
    for action in table.actions() {
        let (plain, with_object) = (table.code_for(action, false), table.code_for(action, true));
        println!("  {:<12} {} / {}", action.to_string().bold(), plain.cyan(), with_object.cyan());
    }
    println!("  {:<12} {}", "(no action)".dimmed(), "x".cyan());
}

fn cmd_map(session: &Session, action: SurgicalAction, code0: &str, code1: Option<&str>) {
    match session.pipeline.add_action_mapping(action.clone(), code0, code1) {
        Ok(()) => {
            let table = session.pipeline.command_table();
            let table = table.read();
            println!(
                "{} {} → {} / {}",
                "✓ Mapped".green(),
                action.to_string().bold(),
                table.code_for(&action, false).cyan(),
                table.code_for(&action, true).cyan()
            );
        }
        Err(e) => println!("{}: {e}", "Mapping rejected".red()),
    }
}

fn cmd_prompt(session: &Session, profile: Option<PromptProfile>) {
    match profile {
        Some(p) => {
            session.driver.set_profile(p);
            println!("{} {}", "✓ Prompt profile set to".green(), p.to_string().bold());
        }
        None => {
            let current = session.driver.profile();
            for p in PromptProfile::ALL {
                let marker = if p == current { "▶" } else { " " };
                println!(
                    "  {} {:<13} temperature {:<5} max tokens {}",
                    marker.green(),
                    p.to_string().bold(),
                    p.temperature(),
                    p.max_tokens()
                );
            }
        }
    }
}

fn cmd_selftest(session: &Session, rt: &Runtime) {
    println!("{}", "Self-test".bold().underline());
    cmd_probe(session, rt);

    println!("  {}", "Test detection".bold());
    print_detection(&session.pipeline.perception().test_detection());

    println!("  {} \"{}\"", "Canned instruction".bold(), SELFTEST_INSTRUCTION);
    let report = rt.block_on(session.pipeline.process_instruction(SELFTEST_INSTRUCTION));
    print_report(&report);
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_report(report: &CycleReport) {
    let status = match report.status {
        CycleStatus::Completed => "COMPLETED".green().bold(),
        CycleStatus::Degraded => "DEGRADED".yellow().bold(),
        CycleStatus::Failed => "FAILED".red().bold(),
    };
    println!("  {} {}", status, report.cycle_id.to_string().dimmed());

    if let Some(intent) = &report.intent {
        println!(
            "    intent   : operator {} · action {} · tool {} · hand {}",
            intent.operator.as_deref().unwrap_or("-").bold(),
            intent.action.as_ref().map_or("-".to_string(), |a| a.to_string()),
            intent.tool.as_deref().unwrap_or("-"),
            intent.handedness.map_or("-".to_string(), |h| h.to_string())
        );
    }
    if let Some(detection) = &report.detection {
        print_detection(detection);
    }
    if let Some(command) = &report.command {
        println!("    command  : {}", command.bold().cyan());
    }
    if let Some(dispatch) = &report.dispatch {
        let outcome = if dispatch.success {
            "sent".green()
        } else {
            "not delivered".red()
        };
        println!(
            "    dispatch : {} {}",
            outcome,
            dispatch.message.as_deref().unwrap_or_default().dimmed()
        );
    }
    for e in &report.errors {
        let line = format!("    ! {e}");
        if e.is_failure() {
            println!("{}", line.red());
        } else {
            println!("{}", line.dimmed());
        }
    }
}

fn print_detection(d: &DetectionResult) {
    let verdict = if d.criteria_met() {
        "criteria met".green()
    } else {
        "criteria not met".yellow()
    };
    let height = d
        .measured_height_cm
        .map(|h| format!("{h} cm"))
        .or_else(|| d.measured_height_px.map(|h| format!("{h} px")))
        .unwrap_or_else(|| "-".into());
    let distance = d
        .derived_distance_cm
        .map_or_else(|| "-".to_string(), |c| format!("{c} cm"));
    println!(
        "    detection: {} (object {}, height {}, distance {}{})",
        verdict,
        d.object_detected,
        height,
        distance,
        if d.simulated { ", simulated" } else { "" }
    );
}
