//! External command execution.

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::Command;

use crate::MigrateError;

/// Run `program` with `args` and return its combined stdout and stderr.
///
/// # Errors
/// Returns [`MigrateError::Command`] if the program cannot be spawned or exits
/// unsuccessfully; the combined output is carried in the error.
pub async fn run<I, S>(program: &str, args: I) -> Result<String, MigrateError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_with_env(program, args, &[]).await
}

/// [`run`] with extra environment variables.
///
/// # Errors
/// See [`run`].
pub async fn run_with_env<I, S>(
    program: &str,
    args: I,
    env: &[(&str, &str)],
) -> Result<String, MigrateError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<S> = args.into_iter().collect();
    let line = std::iter::once(program.to_owned())
        .chain(args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()))
        .collect::<Vec<_>>()
        .join(" ");

    tracing::debug!(command = %line, "running command");

    let mut cmd = Command::new(program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| MigrateError::command(&line, "spawn failed", e.to_string()))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(MigrateError::command(line, output.status.to_string(), combined.trim()));
    }

    if !combined.trim().is_empty() {
        tracing::info!(command = %line, output = %combined.trim(), "command finished");
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn combined_output_is_returned() {
        let out = run("sh", ["-c", "echo out; echo err >&2"]).await;
        match out {
            Ok(s) => {
                assert!(s.contains("out"));
                assert!(s.contains("err"));
            }
            Err(e) => panic!("sh failed: {e}"),
        }
    }

    #[tokio::test]
    async fn failure_carries_output() {
        match run("sh", ["-c", "echo boom; exit 3"]).await {
            Err(MigrateError::Command { output, command, .. }) => {
                assert_eq!(output, "boom");
                assert!(command.starts_with("sh -c"));
            }
            other => panic!("expected Command error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn env_is_passed() {
        let out = run_with_env("sh", ["-c", "echo $CUTOVER_PROBE"], &[("CUTOVER_PROBE", "yes")]).await;
        assert_eq!(out.ok().map(|s| s.trim().to_owned()).as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        assert!(run("cutover-no-such-binary", Vec::<&str>::new()).await.is_err());
    }
}
