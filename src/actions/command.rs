//! Spawning external tools
//!
//! Command templates are split with quote-aware parsing, then placeholders
//! are substituted per argument so paths with spaces stay one argument:
//!
//! - `{input}` / `{output}` / `{output_dir}`: the current file paths
//! - `{inputs}`: one argument per input file (only as a whole argument)
//! - `{style}`: `expanded` or `compressed`, from the build mode

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, StagehandError};
use crate::task::TaskContext;

/// Values substituted into a command template
#[derive(Debug, Default, Clone)]
pub struct Placeholders<'a> {
    pub input: Option<&'a Path>,
    pub inputs: &'a [PathBuf],
    pub output: Option<&'a Path>,
}

/// Does the tool write its own output file?
pub fn writes_output(template: &str) -> bool {
    template.contains("{output}") || template.contains("{output_dir}")
}

/// Parse a command string into parts
pub fn parse_command(cmd: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = '"';

    for c in cmd.chars() {
        match c {
            '"' | '\'' if !in_quotes => {
                in_quotes = true;
                quote_char = c;
            }
            c if c == quote_char && in_quotes => {
                in_quotes = false;
            }
            ' ' | '\t' | '\n' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => {
                current.push(c);
            }
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

fn substitute(arg: &str, ctx: &TaskContext, vars: &Placeholders<'_>) -> String {
    let mut out = arg.replace("{style}", ctx.mode.style_output());
    if let Some(input) = vars.input {
        out = out.replace("{input}", &input.to_string_lossy());
    }
    if let Some(output) = vars.output {
        out = out.replace("{output}", &output.to_string_lossy());
        if let Some(dir) = output.parent() {
            out = out.replace("{output_dir}", &dir.to_string_lossy());
        }
    }
    out
}

/// Expand env vars and `~`, split, and substitute placeholders
pub fn expand_args(template: &str, ctx: &TaskContext, vars: &Placeholders<'_>) -> Vec<String> {
    let expanded = shellexpand::env_with_context_no_errors(template, |var: &str| {
        ctx.env.get(var).cloned().or_else(|| std::env::var(var).ok())
    });
    let expanded = shellexpand::tilde(expanded.as_ref()).into_owned();

    let mut args = Vec::new();
    for part in parse_command(&expanded) {
        if part == "{inputs}" {
            args.extend(vars.inputs.iter().map(|p| p.to_string_lossy().to_string()));
        } else {
            args.push(substitute(&part, ctx, vars));
        }
    }
    args
}

fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Substitute placeholders into the whole line for `sh -c`, quoting paths
fn shell_line(template: &str, ctx: &TaskContext, vars: &Placeholders<'_>) -> String {
    let quote = |p: &Path| shell_quote(&p.to_string_lossy());
    let mut line = template.replace("{style}", ctx.mode.style_output());
    line = line.replace(
        "{inputs}",
        &vars.inputs.iter().map(|p| quote(p.as_path())).collect::<Vec<_>>().join(" "),
    );
    if let Some(input) = vars.input {
        line = line.replace("{input}", &quote(input));
    }
    if let Some(output) = vars.output {
        line = line.replace("{output}", &quote(output));
        if let Some(dir) = output.parent() {
            line = line.replace("{output_dir}", &quote(dir));
        }
    }
    line
}

/// Run a command template; returns its stdout
pub async fn run(ctx: &TaskContext, template: &str, vars: &Placeholders<'_>) -> Result<Vec<u8>> {
    let args = expand_args(template, ctx, vars);
    let Some(program) = args.first() else {
        return Err(StagehandError::CommandFailed {
            command: template.to_string(),
            code: 1,
            stderr: Some("empty command".to_string()),
        });
    };

    let mut shown = args.join(" ");
    let mut command = if ctx.shell {
        let line = shell_line(template, ctx, vars);
        shown = line.clone();
        let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        let mut c = Command::new(shell);
        c.arg(flag).arg(line);
        c
    } else {
        if !program.contains(['/', '\\']) && which::which(program).is_err() {
            return Err(StagehandError::CommandNotFound {
                command: program.clone(),
            });
        }
        let mut c = Command::new(program);
        c.args(&args[1..]);
        c
    };

    command
        .current_dir(&ctx.root)
        .envs(&ctx.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(command = %shown, "spawning tool");
    let output = command.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StagehandError::CommandNotFound {
                command: program.clone(),
            }
        } else {
            StagehandError::Io(e)
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        // Linters tend to report on stdout
        let report = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(StagehandError::CommandFailed {
            command: shown,
            code: output.status.code().unwrap_or(1),
            stderr: Some(report.trim_end().to_string()),
        });
    }

    Ok(output.stdout)
}
