// apptool-backup/src/utils/process.rs
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// An external command as a program plus discrete arguments. Nothing here is
/// ever joined into a shell string.
#[derive(Clone, Default)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(String, String)>,
    pub stdin_file: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_file = Some(path.into());
        self
    }
}

// Env values carry passwords, so only their names are shown.
impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("envs", &self.envs.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("stdin_file", &self.stdin_file)
            .finish()
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs the command to completion, killing it if `limit` elapses.
/// Non-zero exit, spawn failure and timeout all come back as `Err(message)`.
pub async fn run_command(spec: &CommandSpec, limit: Duration) -> Result<CommandOutput, String> {
    let program = spec.program.display().to_string();
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match &spec.stdin_file {
        Some(path) => {
            let file = std::fs::File::open(path)
                .map_err(|e| format!("Failed to open {} as input for {}: {}", path.display(), program, e))?;
            command.stdin(Stdio::from(file));
        }
        None => {
            command.stdin(Stdio::null());
        }
    }

    tracing::debug!(command = ?spec, "running external command");
    let child = command
        .spawn()
        .map_err(|e| format!("Failed to execute {}: {}", program, e))?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| format!("Failed to wait for {}: {}", program, e))?,
        Err(_) => {
            return Err(format!(
                "{} timed out after {} seconds",
                program,
                limit.as_secs()
            ));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(format!(
            "{} failed with status: {}\nStderr: {}",
            program, output.status, stderr
        ));
    }
    Ok(CommandOutput { stdout, stderr })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let spec = CommandSpec::new("sh").arg("-c").arg("echo boom >&2; exit 3");
        let err = run_command(&spec, Duration::from_secs(10)).await.unwrap_err();
        assert!(err.contains("boom"));
    }

    #[tokio::test]
    async fn arguments_are_not_shell_interpolated() {
        let spec = CommandSpec::new("echo").arg("$(whoami); rm -rf /");
        let out = run_command(&spec, Duration::from_secs(10)).await.unwrap();
        assert_eq!(out.stdout, "$(whoami); rm -rf /");
    }

    #[tokio::test]
    async fn timeout_is_fatal() {
        let spec = CommandSpec::new("sleep").arg("5");
        let err = run_command(&spec, Duration::from_millis(100)).await.unwrap_err();
        assert!(err.contains("timed out"));
    }

    #[tokio::test]
    async fn stdin_is_fed_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.sql");
        std::fs::write(&input, "select 1;").unwrap();

        let spec = CommandSpec::new("cat").stdin_file(&input);
        let out = run_command(&spec, Duration::from_secs(10)).await.unwrap();
        assert_eq!(out.stdout, "select 1;");
    }

    #[tokio::test]
    async fn stderr_of_successful_command_is_captured() {
        let spec = CommandSpec::new("sh").arg("-c").arg("echo 'Using a password is insecure' >&2");
        let out = run_command(&spec, Duration::from_secs(10)).await.unwrap();
        assert_eq!(out.stdout, "");
        assert_eq!(out.stderr, "Using a password is insecure");
    }
}
