//! Runs project stage scripts.
//!
//! Commands are executed directly, not through a shell. A command line
//! is split on whitespace — quoting is deliberately unsupported, so an
//! argument can never contain a space. The literal `@dir` expands to
//! the working directory in both the command line and the environment,
//! and the child sees only the environment the project definition
//! provides.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Errors from running a stage script.
///
/// The `Display` form of [`RunError::Failed`] is the exit status
/// followed by the captured output, which is what gets recorded in the
/// project log.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("empty command")]
    EmptyCommand,

    #[error("executable {0:?} not found")]
    NotFound(String),

    #[error("could not start command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("{status}\n{output}")]
    Failed { status: ExitStatus, output: String },
}

/// Runs `command` in `dir` with exactly the given `KEY=VALUE`
/// environment, returning stdout and stderr interleaved into one
/// buffer.
///
/// The program is resolved against a `PATH=` entry of `env` when one
/// exists (colon-separated, an empty element meaning the working
/// directory), otherwise against the host's `PATH`.
pub async fn run(command: &str, dir: &Path, env: &[String]) -> Result<String, RunError> {
    let dir_str = dir.to_string_lossy();
    let expanded = command.replace("@dir", &dir_str);
    let env: Vec<String> = env.iter().map(|e| e.replace("@dir", &dir_str)).collect();

    let mut tokens = expanded.split_whitespace();
    let program = tokens.next().ok_or(RunError::EmptyCommand)?;
    let args: Vec<&str> = tokens.collect();

    let path = look_path(program, &env)?;

    debug!("executing command {:?} in dir {}", expanded, dir.display());

    let mut cmd = Command::new(&path);
    cmd.args(&args)
        .current_dir(dir)
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for entry in &env {
        match entry.split_once('=') {
            Some((key, value)) => cmd.env(key, value),
            None => cmd.env(entry, ""),
        };
    }

    let mut child = cmd.spawn().map_err(RunError::Spawn)?;

    let output = Arc::new(Mutex::new(String::new()));
    let stdout = spawn_reader(child.stdout.take(), Arc::clone(&output));
    let stderr = spawn_reader(child.stderr.take(), Arc::clone(&output));

    let status = child.wait().await.map_err(RunError::Spawn)?;
    let _ = stdout.await;
    let _ = stderr.await;

    let output = output.lock().unwrap().clone();

    if !status.success() {
        return Err(RunError::Failed { status, output });
    }
    Ok(output)
}

/// Copies lines from one of the child's output streams into the shared
/// buffer as they arrive, so stdout and stderr interleave roughly in
/// emission order.
fn spawn_reader<R>(reader: Option<R>, sink: Arc<Mutex<String>>) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else {
            return;
        };
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut sink = sink.lock().unwrap();
            sink.push_str(&line);
            sink.push('\n');
        }
    })
}

/// Resolves a program name the way a shell would, except that a
/// `PATH=` entry in the supplied environment takes precedence over the
/// host's.
fn look_path(program: &str, env: &[String]) -> Result<PathBuf, RunError> {
    if program.contains('/') {
        if is_executable(Path::new(program)) {
            return Ok(PathBuf::from(program));
        }
        return Err(RunError::NotFound(program.to_string()));
    }

    if let Some(path_env) = env.iter().find_map(|e| e.strip_prefix("PATH=")) {
        if path_env.is_empty() {
            return Err(RunError::NotFound(program.to_string()));
        }
        return search_path(program, path_env);
    }

    match std::env::var("PATH") {
        Ok(path_env) => search_path(program, &path_env),
        Err(_) => Err(RunError::NotFound(program.to_string())),
    }
}

fn search_path(program: &str, path_env: &str) -> Result<PathBuf, RunError> {
    for dir in path_env.split(':') {
        // Unix shell semantics: an empty path element means "."
        let dir = if dir.is_empty() { "." } else { dir };
        let candidate = Path::new(dir).join(program);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(RunError::NotFound(program.to_string()))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| !meta.is_dir() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const HOST_PATH: &str = "PATH=/usr/local/bin:/usr/bin:/bin";

    /// Writes an executable shell script into `dir`.
    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn test_captures_output() {
        let dir = TempDir::new().unwrap();
        let output = run("echo hello world", dir.path(), &[HOST_PATH.to_string()])
            .await
            .unwrap();
        assert_eq!(output, "hello world\n");
    }

    #[tokio::test]
    async fn test_whitespace_tokenization() {
        let dir = TempDir::new().unwrap();
        // runs of whitespace collapse; echo re-joins its arguments
        let output = run("echo a   b\tc", dir.path(), &[HOST_PATH.to_string()])
            .await
            .unwrap();
        assert_eq!(output, "a b c\n");
    }

    #[tokio::test]
    async fn test_dir_macro_expansion() {
        let dir = TempDir::new().unwrap();
        let output = run(
            "echo @dir",
            dir.path(),
            &[HOST_PATH.to_string(), "WORKDIR=@dir".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(output.trim(), dir.path().to_string_lossy());
    }

    #[tokio::test]
    async fn test_env_expansion_reaches_child() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "print-workdir", "echo $WORKDIR");

        let env = vec![
            format!("PATH={}:/usr/bin:/bin", dir.path().display()),
            "WORKDIR=@dir".to_string(),
        ];
        let output = run("print-workdir", dir.path(), &env).await.unwrap();
        assert_eq!(output.trim(), dir.path().to_string_lossy());
    }

    #[tokio::test]
    async fn test_custom_path_lookup() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "custom-tool", "echo custom");

        let env = vec![format!("PATH={}", dir.path().display())];
        let output = run("custom-tool", dir.path(), &env).await.unwrap();
        assert_eq!(output, "custom\n");

        // a PATH entry in the environment is authoritative
        let err = run("echo hi", dir.path(), &env).await.unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_path_entry_fails() {
        let dir = TempDir::new().unwrap();
        let err = run("echo hi", dir.path(), &["PATH=".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_output() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "broken-build", "echo something went wrong\nexit 3");

        let env = vec![format!("PATH={}:/usr/bin:/bin", dir.path().display())];
        let err = run("broken-build", dir.path(), &env).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("3"), "unexpected message: {}", message);
        assert!(message.contains("something went wrong"));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let dir = TempDir::new().unwrap();
        let err = run("   ", dir.path(), &[]).await.unwrap_err();
        assert!(matches!(err, RunError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("marker.txt"), "present").unwrap();

        let output = run("ls", dir.path(), &[HOST_PATH.to_string()])
            .await
            .unwrap();
        assert!(output.contains("marker.txt"));
    }
}
