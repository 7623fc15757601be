use std::{
    ffi::OsStr,
    path::Path,
    process::{Command, Stdio},
};

use crate::error::{Error, Result};

/// Captured result of an external converter or unpacker run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code, or -1 when the process was killed by a signal.
    pub code: i32,
    /// Stdout followed by stderr, decoded lossily.
    pub output: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run `program` with `args` and capture its output.
///
/// A non-zero exit is not an error here; callers decide which exit codes
/// they tolerate. Failing to start the process at all is.
pub fn run<I, S>(program: &str, args: I, cwd: Option<&Path>) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    tracing::trace!(program, "running external tool");
    let out = command.output().map_err(|e| {
        Error::Extraction(format!("failed to start {program}: {e}"))
    })?;

    let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&out.stderr));
    Ok(ToolOutput {
        code: out.status.code().unwrap_or(-1),
        output,
    })
}

/// Run `program` and fail with [`Error::Tool`] unless it exits with one of
/// the `accepted` codes.
pub fn run_checked<I, S>(
    program: &str,
    args: I,
    cwd: Option<&Path>,
    accepted: &[i32],
) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let out = run(program, args, cwd)?;
    if accepted.contains(&out.code) {
        Ok(out)
    } else {
        Err(Error::Tool {
            tool: program.to_string(),
            code: out.code,
            output: out.output,
        })
    }
}
