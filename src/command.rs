//! External program invocation.
//!
//! Every host tool (hypervisor destroyer, volume manager, interface manager,
//! neighbor table) goes through [`run`]: a non-zero exit becomes
//! [`BuildError::ExternalCommand`] carrying the trimmed stderr.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::BuildError;

/// Run `program` with `args` and return its stdout.
pub async fn run<I, S>(program: &Path, args: I) -> Result<String, BuildError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    debug!(command = ?cmd.as_std(), "exec");

    let output = cmd.output().await.map_err(|source| BuildError::CommandSpawn {
        program: program.display().to_string(),
        source,
    })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(failure(program, output.status, &output.stderr))
    }
}

/// Run `program` with stdout redirected into `dest`, which is created or
/// truncated.
pub async fn run_to_file<I, S>(program: &Path, args: I, dest: &Path) -> Result<(), BuildError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let file = tokio::fs::File::create(dest).await?.into_std().await;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(file))
        .stderr(Stdio::piped());
    debug!(command = ?cmd.as_std(), dest = %dest.display(), "exec");

    // `output()` would re-pipe stdout; spawn keeps the file handle.
    let child = cmd.spawn().map_err(|source| BuildError::CommandSpawn {
        program: program.display().to_string(),
        source,
    })?;
    let output = child.wait_with_output().await?;

    if output.status.success() {
        Ok(())
    } else {
        Err(failure(program, output.status, &output.stderr))
    }
}

fn failure(program: &Path, status: std::process::ExitStatus, stderr: &[u8]) -> BuildError {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    let stderr = if stderr.is_empty() {
        match status.code() {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    } else {
        stderr
    };
    BuildError::ExternalCommand {
        program: program.display().to_string(),
        stderr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stdout_is_returned_on_success() {
        let out = run(Path::new("/bin/sh"), ["-c", "echo hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let err = run(Path::new("/bin/sh"), ["-c", "echo 'dataset is busy' >&2; exit 1"])
            .await
            .unwrap_err();
        match err {
            BuildError::ExternalCommand { stderr, .. } => assert_eq!(stderr, "dataset is busy"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_failure_reports_exit_status() {
        let err = run(Path::new("/bin/sh"), ["-c", "exit 3"]).await.unwrap_err();
        assert!(err.to_string().contains("exit status 3"), "got: {err}");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run(Path::new("/nonexistent/tool"), ["x"]).await.unwrap_err();
        assert!(matches!(err, BuildError::CommandSpawn { .. }));
    }

    #[tokio::test]
    async fn stdout_can_be_redirected_to_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("stream");
        run_to_file(Path::new("/bin/sh"), ["-c", "printf payload"], &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "payload");
    }

    #[tokio::test]
    async fn large_stream_lands_in_file_and_stderr_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("stream");
        let err = run_to_file(
            Path::new("/bin/sh"),
            ["-c", "head -c 200000 /dev/zero; echo 'send interrupted' >&2; exit 1"],
            &dest,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("send interrupted"), "got: {err}");
        assert_eq!(std::fs::metadata(dest).unwrap().len(), 200_000);
    }
}
