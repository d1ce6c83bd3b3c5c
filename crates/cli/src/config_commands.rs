use std::path::Path;

use {anyhow::Result, clap::Subcommand, secrecy::Secret};

use dbhq_config::{Severity, ValidationResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration, token redacted.
    Show,
    /// Print the path of the config file that would be loaded.
    Path,
}

pub fn handle_config(action: ConfigAction, explicit: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(explicit, verbose),
        ConfigAction::Show => show(explicit),
        ConfigAction::Path => {
            match explicit.map(Path::to_path_buf).or_else(dbhq_config::find_config_file) {
                Some(path) => println!("{}", path.display()),
                None => eprintln!("No config file found."),
            }
            Ok(())
        },
    }
}

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(explicit: Option<&Path>, verbose: bool) -> Result<()> {
    let result = match explicit.map(Path::to_path_buf).or_else(dbhq_config::find_config_file) {
        Some(path) => dbhq_config::validate_file(&path),
        None => {
            let mut config = dbhq_config::DbhqConfig::default();
            dbhq_config::apply_env_overrides(&mut config);
            dbhq_config::validate(&config)
        },
    };

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let shown = print_diagnostics(&result, verbose);
    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_diagnostics(result: &ValidationResult, verbose: bool) -> usize {
    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };
        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }
    shown
}

fn show(explicit: Option<&Path>) -> Result<()> {
    let mut loaded = dbhq_config::discover_and_load(explicit)?;
    if loaded.config.discord.token.is_some() {
        loaded.config.discord.token = Some(Secret::new("[REDACTED]".into()));
    }
    println!("{}", serde_json::to_string_pretty(&loaded.config)?);
    Ok(())
}
