//! parx: run shell commands in parallel with line-prefixed output.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, loads the process list from positional commands or a
//! configuration file, and hands it to the supervisor.

mod config;
mod error;
mod kill;
mod output;
mod process;
mod signal;
mod supervisor;

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::process::{ProcessSpec, DEFAULT_SHELL};
use crate::supervisor::{Outcome, Supervisor};

const LOG_ENV: &str = "PARX_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn enabled(self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => {
                std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
            }
        }
    }
}

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "parx",
    version,
    about = "Run shell commands in parallel with prefixed output",
    styles = help_styles()
)]
struct Cli {
    /// Default shell when using commands via arguments.
    #[arg(short = 'x', long, default_value = DEFAULT_SHELL)]
    shell: String,
    /// Path to the parx.yml file.
    #[arg(short = 'f', long, default_value = "parx.yml")]
    file: PathBuf,
    /// When to color process prefixes.
    #[arg(long, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,
    /// Commands to run; take precedence over the configuration file.
    commands: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let specs = match load_specs(&cli) {
        Ok(specs) => specs,
        Err(err) => {
            println!("{:#}", err);
            std::process::exit(1);
        }
    };

    let supervisor = Supervisor::new(cli.color.enabled());
    match supervisor.run(specs).await {
        Outcome::Completed(exits) => {
            let failed = exits.iter().filter(|exit| exit.result.is_err()).count();
            debug!(processes = exits.len(), failed, "all processes exited");
            Ok(())
        }
        // Exit without waiting on the killed processes' wait and output tasks.
        Outcome::Interrupted => std::process::exit(0),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_specs(cli: &Cli) -> Result<Vec<ProcessSpec>> {
    let specs = if cli.commands.is_empty() {
        config::load_config(&cli.file)?.into_specs(&cli.shell)?
    } else {
        specs_from_args(&cli.commands, &cli.shell)
    };
    if specs.is_empty() {
        bail!(
            "no processes defined (add them to {} or pass commands as arguments)",
            cli.file.display()
        );
    }
    Ok(specs)
}

fn specs_from_args(commands: &[String], shell: &str) -> Vec<ProcessSpec> {
    commands
        .iter()
        .enumerate()
        .map(|(idx, command)| ProcessSpec::from_argument(idx, shell, command))
        .collect()
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_commands_become_specs() {
        let cli = Cli::parse_from(["parx", "-x", "sh", "echo a", "echo b"]);
        let specs = load_specs(&cli).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "process_0");
        assert_eq!(specs[1].name, "process_1");
        assert_eq!(specs[1].command, "echo b");
        assert!(specs.iter().all(|spec| spec.shell == "sh"));
        assert!(specs.iter().all(|spec| spec.env.is_empty()));
    }

    #[test]
    fn positional_commands_take_precedence_over_file() {
        let cli = Cli::parse_from(["parx", "-f", "/nonexistent/parx.yml", "true"]);
        let specs = load_specs(&cli).unwrap();
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn default_flags() {
        let cli = Cli::parse_from(["parx"]);
        assert_eq!(cli.shell, "bash");
        assert_eq!(cli.file, PathBuf::from("parx.yml"));
        assert_eq!(cli.color, ColorChoice::Auto);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["parx", "-f", "/nonexistent/parx.yml"]);
        let err = load_specs(&cli).unwrap_err();
        assert!(format!("{:#}", err).contains("could not read config file"));
    }

    #[test]
    fn explicit_color_choices() {
        assert!(ColorChoice::Always.enabled());
        assert!(!ColorChoice::Never.enabled());
    }
}
