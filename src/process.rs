//! Process specifications and command construction.
//!
//! A `ProcessSpec` is the finished description of one command to run. The
//! supervisor assigns its display color and asks it for an executable
//! `Command`, which is built lazily and at most once.

use std::collections::HashMap;
use std::io::{self, Stderr, Stdout};
use std::path::Path;
use std::process::Stdio;

use crossterm::style::Color;
use tokio::process::Command;

use crate::output::PrefixedWriter;

/// Shell used when a spec does not name one.
pub const DEFAULT_SHELL: &str = "bash";

/// Display colors cycled across processes by launch index.
pub const PALETTE: [Color; 7] = [
    Color::DarkBlue,
    Color::DarkRed,
    Color::DarkGreen,
    Color::DarkYellow,
    Color::DarkCyan,
    Color::DarkMagenta,
    Color::Grey,
];

/// Returns the palette color for the process at `index`.
pub fn palette_color(index: usize) -> Color {
    PALETTE[index % PALETTE.len()]
}

/// Specification for a process to be run.
#[derive(Debug)]
pub struct ProcessSpec {
    /// Label shown before every output line; unique within a run.
    pub name: String,
    /// Interpreter that runs `command`.
    pub shell: String,
    /// Command line handed to the shell as a single argument.
    pub command: String,
    /// Variables set on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Prefix color, assigned by the supervisor at launch.
    pub color: Color,
    built: Option<Command>,
}

impl ProcessSpec {
    pub fn new(
        name: impl Into<String>,
        shell: impl Into<String>,
        command: impl Into<String>,
        env: HashMap<String, String>,
    ) -> Self {
        let mut shell = shell.into();
        if shell.is_empty() {
            shell = DEFAULT_SHELL.to_string();
        }
        Self {
            name: name.into(),
            shell,
            command: command.into(),
            env,
            color: Color::Reset,
            built: None,
        }
    }

    /// Spec for an ad-hoc command passed on the command line.
    pub fn from_argument(index: usize, shell: &str, command: &str) -> Self {
        Self::new(auto_name(index), shell, command, HashMap::new())
    }

    /// The `"<name> | "` label written before each line of output.
    pub fn label(&self) -> String {
        format!("{} | ", self.name)
    }

    /// Shell-quoted rendering of the invocation, for diagnostics.
    pub fn display_command(&self) -> String {
        shell_words::join([
            self.shell.as_str(),
            exec_flag(&self.shell),
            self.command.as_str(),
        ])
    }

    /// Returns the executable command for this spec, building it on first use.
    ///
    /// The child inherits the supervisor's environment with `env` applied on
    /// top, so overrides win over inherited values. Its stdout and stderr are
    /// piped so they can be drained through the writers from
    /// [`ProcessSpec::output_writers`]. Shell or command validity is only
    /// discovered at spawn time.
    pub fn build_command(&mut self) -> &mut Command {
        let Self {
            shell,
            command: line,
            env,
            built,
            ..
        } = self;
        built.get_or_insert_with(|| {
            let mut command = Command::new(shell.as_str());
            command
                .arg(exec_flag(shell.as_str()))
                .arg(line.as_str())
                .envs(env.iter())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            command
        })
    }

    /// Writers that forward this process's output to the supervisor's own
    /// stdout and stderr, labeled with its name.
    pub fn output_writers(
        &self,
        colored: bool,
    ) -> (PrefixedWriter<Stdout>, PrefixedWriter<Stderr>) {
        let label = self.label();
        let color = colored.then_some(self.color);
        (
            PrefixedWriter::new(&label, color, io::stdout()),
            PrefixedWriter::new(&label, color, io::stderr()),
        )
    }
}

/// Name given to processes that were not named explicitly.
pub fn auto_name(index: usize) -> String {
    format!("process_{}", index)
}

// Option that makes `shell` execute its next argument as a command line.
fn exec_flag(shell: &str) -> &'static str {
    let stem = Path::new(shell)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(shell)
        .to_ascii_lowercase();
    match stem.as_str() {
        "cmd" => "/C",
        "powershell" | "pwsh" => "-Command",
        _ => "-c",
    }
}
