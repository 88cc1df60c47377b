//! Composers turn one configuration into a built product.
//!
//! The worker pool treats a composer as an opaque build call. Two
//! implementations ship with the crate: [`ConfigFileComposer`] only writes
//! the selection, [`ShellComposer`] also runs a user command per variant.

use crate::configuration::Configuration;
use crate::error::{ProdlineError, Result};
use crate::io;
use crate::paths::CONFIG_EXTENSION;
use crate::types::BuildOutcome;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Exit code a build command uses to report that it skipped the variant.
pub const SKIP_EXIT_CODE: i32 = 77;

/// Output kept from a build command, tail only.
const MAX_OUTPUT: usize = 10 * 1024;

// ---------------------------------------------------------------------------
// BuildContext
// ---------------------------------------------------------------------------

/// Everything a composer needs to know about where a variant goes.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// 1-based build index.
    pub index: usize,
    /// Variant name: `00001` in the shared products folder, the sibling
    /// project name otherwise.
    pub name: String,
    /// Folder owned exclusively by this build.
    pub output_dir: PathBuf,
    pub variables: Arc<[String]>,
    pub classpath: Arc<[PathBuf]>,
    pub run_tests: bool,
}

impl BuildContext {
    pub fn config_file(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{CONFIG_EXTENSION}", self.name))
    }
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

pub trait Composer: Send + Sync {
    fn name(&self) -> &str;

    /// Called once before any build. `Ok(false)` turns the job into a no-op.
    fn prepare(&self) -> Result<bool> {
        Ok(true)
    }

    fn build(&self, config: &Configuration, ctx: &BuildContext) -> BuildOutcome;

    /// Whether several builds may run at the same time.
    fn supports_parallel_build(&self) -> bool {
        true
    }
}

fn write_config(config: &Configuration, ctx: &BuildContext) -> Result<PathBuf> {
    let path = ctx.config_file();
    io::atomic_write(&path, config.to_config_text(&ctx.variables).as_bytes())?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// ConfigFileComposer
// ---------------------------------------------------------------------------

/// Writes the selection as a `.config` file into the variant's folder.
#[derive(Debug, Clone, Default)]
pub struct ConfigFileComposer;

impl Composer for ConfigFileComposer {
    fn name(&self) -> &str {
        "config_file"
    }

    fn build(&self, config: &Configuration, ctx: &BuildContext) -> BuildOutcome {
        let path = match write_config(config, ctx) {
            Ok(path) => path,
            Err(e) => return BuildOutcome::failed(format!("cannot write configuration: {e}")),
        };
        if !ctx.run_tests {
            return BuildOutcome::Success;
        }
        match std::fs::read_to_string(&path)
            .map_err(ProdlineError::from)
            .and_then(|text| Configuration::parse_config_text(&ctx.variables, &text))
        {
            Ok(read_back) if read_back == *config => BuildOutcome::Success,
            Ok(_) => BuildOutcome::failed(format!(
                "{} does not read back to the built selection",
                path.display()
            )),
            Err(e) => BuildOutcome::failed(format!("cannot read back {}: {e}", path.display())),
        }
    }
}

// ---------------------------------------------------------------------------
// ShellComposer
// ---------------------------------------------------------------------------

/// Runs a shell command in each variant's folder after writing its
/// `.config` file.
///
/// Exit code 0 is a successful build and [`SKIP_EXIT_CODE`] a skipped one;
/// anything else fails the variant with the tail of the command output.
/// On Unix the command runs in its own process group and a timeout kills the
/// whole group; elsewhere only the shell itself is killed.
#[derive(Debug, Clone)]
pub struct ShellComposer {
    command: String,
    shell: String,
    parallel: bool,
    timeout: Option<Duration>,
}

impl ShellComposer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: "sh".to_string(),
            parallel: true,
            timeout: None,
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn env(&self, config: &Configuration, ctx: &BuildContext, config_file: &Path) -> Vec<(String, String)> {
        let classpath = std::env::join_paths(ctx.classpath.iter())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        vec![
            ("PRODLINE_CONFIG".into(), config_file.display().to_string()),
            ("PRODLINE_INDEX".into(), ctx.index.to_string()),
            ("PRODLINE_OUTPUT".into(), ctx.output_dir.display().to_string()),
            (
                "PRODLINE_FEATURES".into(),
                config.selected_names(&ctx.variables).join(","),
            ),
            ("PRODLINE_CLASSPATH".into(), classpath),
            ("PRODLINE_RUN_TESTS".into(), ctx.run_tests.to_string()),
        ]
    }
}

impl Composer for ShellComposer {
    fn name(&self) -> &str {
        "shell"
    }

    fn prepare(&self) -> Result<bool> {
        if self.command.trim().is_empty() {
            warn!("shell composer has no command configured");
            return Ok(false);
        }
        which::which(&self.shell).map_err(|e| {
            ProdlineError::Composer(format!("shell '{}' not found: {e}", self.shell))
        })?;
        Ok(true)
    }

    fn build(&self, config: &Configuration, ctx: &BuildContext) -> BuildOutcome {
        let config_file = match write_config(config, ctx) {
            Ok(path) => path,
            Err(e) => return BuildOutcome::failed(format!("cannot write configuration: {e}")),
        };
        let env = self.env(config, ctx, &config_file);
        let run = run_command(&self.shell, &self.command, &ctx.output_dir, &env, self.timeout);
        debug!(index = ctx.index, code = ?run.code, "build command finished");
        match run.code {
            Some(0) => BuildOutcome::Success,
            Some(SKIP_EXIT_CODE) => BuildOutcome::skipped(run.output),
            Some(code) => BuildOutcome::failed(format!("exit code {code}: {}", run.output)),
            None => BuildOutcome::failed(run.output),
        }
    }

    fn supports_parallel_build(&self) -> bool {
        self.parallel
    }
}

// ---------------------------------------------------------------------------
// Command execution
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CommandRun {
    /// `None` when the command could not run to completion.
    code: Option<i32>,
    output: String,
}

/// Run `<shell> -c <command>` in `cwd`.
///
/// Output is read on dedicated threads so a chatty command cannot fill the
/// pipe buffers, and the timeout is a waiter thread plus `recv_timeout`.
fn run_command(
    shell: &str,
    command: &str,
    cwd: &Path,
    env: &[(String, String)],
    timeout: Option<Duration>,
) -> CommandRun {
    let failed = |output: String| CommandRun { code: None, output };
    let mut cmd = Command::new(shell);
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group, so a timeout takes down everything the command started.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return failed(format!("failed to spawn: {e}")),
    };

    let child_pid = child.id();
    let stdout_thread = read_pipe(child.stdout.take());
    let stderr_thread = read_pipe(child.stderr.take());

    let wait_result = match timeout {
        None => child.wait(),
        Some(limit) => {
            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let _ = tx.send(child.wait());
            });
            match rx.recv_timeout(limit) {
                Ok(result) => result,
                Err(_) => {
                    kill_process(child_pid);
                    return failed(format!("timed out after {}s", limit.as_secs()));
                }
            }
        }
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();
    match wait_result {
        Ok(status) => CommandRun {
            code: Some(status.code().unwrap_or(-1)),
            output: combine_output(&stdout, &stderr),
        },
        Err(e) => failed(format!("wait failed: {e}")),
    }
}

fn read_pipe<R: std::io::Read + Send + 'static>(
    pipe: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut r) = pipe {
            let _ = r.read_to_string(&mut buf);
        }
        buf
    })
}

/// Combine stdout and stderr, keeping the last [`MAX_OUTPUT`] bytes.
fn combine_output(stdout: &str, stderr: &str) -> String {
    let output = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{stdout}\n{stderr}"),
    };
    let trimmed = output.trim();
    if trimmed.len() <= MAX_OUTPUT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_OUTPUT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// SIGKILL the process group led by `pid`.
fn kill_process(pid: u32) {
    let target = if cfg!(unix) {
        format!("-{pid}")
    } else {
        pid.to_string()
    };
    let _ = Command::new("kill")
        .args(["-9", "--", &target])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(dir: &Path, run_tests: bool) -> BuildContext {
        BuildContext {
            index: 3,
            name: "00003".to_string(),
            output_dir: dir.join("00003"),
            variables: vec!["A".to_string(), "B".to_string()].into(),
            classpath: vec![dir.join("lib")].into(),
            run_tests,
        }
    }

    #[test]
    fn config_file_composer_writes_selection() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(dir.path(), true);
        let config = Configuration::from_values(&[false, true]);
        assert_eq!(ConfigFileComposer.build(&config, &ctx), BuildOutcome::Success);
        let text = std::fs::read_to_string(dir.path().join("00003/00003.config")).unwrap();
        assert_eq!(text, "B\n");
    }

    #[test]
    fn shell_composer_exposes_variant_environment() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(dir.path(), false);
        let composer = ShellComposer::new(
            "echo \"$PRODLINE_INDEX $PRODLINE_FEATURES $PRODLINE_RUN_TESTS\" > out.txt",
        );
        assert!(composer.prepare().unwrap());
        let config = Configuration::from_values(&[true, true]);
        assert_eq!(composer.build(&config, &ctx), BuildOutcome::Success);
        let out = std::fs::read_to_string(ctx.output_dir.join("out.txt")).unwrap();
        assert_eq!(out.trim(), "3 A,B false");
    }

    #[test]
    fn shell_composer_maps_exit_codes() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(dir.path(), false);
        let config = Configuration::from_values(&[true, false]);

        let skipped = ShellComposer::new("echo nothing to test; exit 77").build(&config, &ctx);
        assert_eq!(skipped, BuildOutcome::skipped("nothing to test"));

        let failed = ShellComposer::new("echo broken >&2; exit 3").build(&config, &ctx);
        assert!(matches!(failed, BuildOutcome::Failed { reason } if reason.contains("broken")));
    }

    #[test]
    fn shell_composer_times_out() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(dir.path(), false);
        let composer = ShellComposer::new("sleep 5").timeout(Some(Duration::from_millis(200)));
        let outcome = composer.build(&Configuration::from_values(&[true, true]), &ctx);
        assert!(matches!(outcome, BuildOutcome::Failed { reason } if reason.contains("timed out")));
    }

    #[test]
    fn timeout_kills_background_children() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(dir.path(), false);
        let composer = ShellComposer::new("(sleep 1; touch late) & wait")
            .timeout(Some(Duration::from_millis(200)));
        let outcome = composer.build(&Configuration::from_values(&[true, false]), &ctx);
        assert!(matches!(outcome, BuildOutcome::Failed { reason } if reason.contains("timed out")));

        std::thread::sleep(Duration::from_millis(1500));
        assert!(!ctx.output_dir.join("late").exists());
    }

    #[test]
    fn missing_shell_is_a_composer_error() {
        let composer = ShellComposer::new("true").shell("definitely-not-a-shell-xyz");
        assert!(matches!(composer.prepare(), Err(ProdlineError::Composer(_))));
    }

    #[test]
    fn empty_command_refuses_to_prepare() {
        assert!(!ShellComposer::new("  ").prepare().unwrap());
        assert!(!ShellComposer::new("true").parallel(false).supports_parallel_build());
    }

    #[test]
    fn output_keeps_the_tail() {
        let long = "x".repeat(MAX_OUTPUT + 10);
        let combined = combine_output(&format!("head{long}"), "");
        assert_eq!(combined.len(), MAX_OUTPUT);
        assert!(!combined.starts_with("head"));
    }
}
