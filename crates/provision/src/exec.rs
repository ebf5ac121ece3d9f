//! Helper binary invocation.

use std::ffi::OsStr;

use tokio::process::Command;
use tracing::debug;

use crate::providers::ProviderError;

/// Run `program` with `args` and return its trimmed stdout.
///
/// # Errors
/// Returns [`ProviderError::Spawn`] if the binary cannot be started and
/// [`ProviderError::Command`] if it exits unsuccessfully.
pub(crate) async fn run<I, S>(program: &str, args: I) -> Result<String, ProviderError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    debug!(command = ?cmd.as_std(), "Running");

    let output = cmd.output().await.map_err(|source| ProviderError::Spawn {
        command: program.to_string(),
        source,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProviderError::Command {
            command: program.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Check that `program` is on `PATH`.
///
/// # Errors
/// Returns [`ProviderError::Config`] naming the missing binary.
pub(crate) fn require(program: &str) -> Result<(), ProviderError> {
    which::which(program)
        .map(|_| ())
        .map_err(|_| ProviderError::Config(format!("{program} is not installed or not in PATH")))
}
