use std::fmt;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("{program} not found (install it or set its path under [binaries] in the config file)")]
    NotFound { program: String },
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{command}` failed ({code}): {detail}")]
    Failed {
        command: String,
        code: String,
        detail: String,
    },
}

/// Whether running an invocation changes state on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ReadOnly,
    Mutating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub effect: Effect,
}

impl Invocation {
    pub fn read<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(program, args, Effect::ReadOnly)
    }

    pub fn mutating<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(program, args, Effect::Mutating)
    }

    fn new<I, S>(program: &str, args: I, effect: Effect) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            effect,
        }
    }
}

/// Flags whose values must never reach logs or error messages.
const SECRET_FLAGS: &[&str] = &["--api-token="];

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if let Some(flag) = SECRET_FLAGS.iter().find(|flag| arg.starts_with(**flag)) {
                write!(f, " {flag}<redacted>")?;
            } else if arg.is_empty()
                || arg.contains(char::is_whitespace)
                || arg.contains(['*', '?', '['])
            {
                write!(f, " '{}'", arg.replace('\'', "'\\''"))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        CommandOutput {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    fn into_result(self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        if self.success {
            return Ok(self);
        }

        // cf reports most failures on stdout ("FAILED" followed by the reason).
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };

        Err(ExecError::Failed {
            command: invocation.to_string(),
            code: self
                .code
                .map(|c| format!("exit code {c}"))
                .unwrap_or_else(|| "killed by signal".to_string()),
            detail: detail.lines().last().unwrap_or("no output").to_string(),
        })
    }
}

pub trait Runner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;
}

/// Runs invocations as child processes, capturing stdout and stderr.
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExecError::NotFound {
                        program: invocation.program.clone(),
                    }
                } else {
                    ExecError::Spawn {
                        program: invocation.program.clone(),
                        source: e,
                    }
                }
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Entry point for every external command.
///
/// Mutating invocations are skipped (and only logged) in dry-run mode, so
/// callers never need to check the flag themselves.
pub struct Executor {
    runner: Box<dyn Runner>,
    dry_run: bool,
}

impl Executor {
    pub fn new(runner: Box<dyn Runner>, dry_run: bool) -> Self {
        Executor { runner, dry_run }
    }

    pub fn system(dry_run: bool) -> Self {
        Self::new(Box::new(SystemRunner), dry_run)
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a read-only invocation, failing on a non-zero exit.
    pub fn read(&self, invocation: Invocation) -> Result<CommandOutput, ExecError> {
        let output = self.run(&invocation)?;
        output.into_result(&invocation)
    }

    /// Run an invocation and hand back its output whatever the exit status.
    pub fn probe(&self, invocation: Invocation) -> Result<CommandOutput, ExecError> {
        self.try_mutate(invocation)
    }

    /// Run a mutating invocation, failing on a non-zero exit.
    pub fn mutate(&self, invocation: Invocation) -> Result<CommandOutput, ExecError> {
        let output = self.try_mutate(invocation.clone())?;
        output.into_result(&invocation)
    }

    /// Like [`Executor::mutate`] but a non-zero exit is returned as output
    /// rather than an error.
    pub fn try_mutate(&self, invocation: Invocation) -> Result<CommandOutput, ExecError> {
        if self.dry_run && invocation.effect == Effect::Mutating {
            info!("[dry-run] would run: {invocation}");
            return Ok(CommandOutput::ok(""));
        }
        self.run(&invocation)
    }

    pub fn pause(&self, seconds: u64) {
        if seconds == 0 {
            return;
        }
        if self.dry_run {
            info!("[dry-run] would wait {seconds}s");
            return;
        }
        info!("Waiting {seconds}s before continuing");
        std::thread::sleep(Duration::from_secs(seconds));
    }

    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        debug!("Running {invocation}");
        let output = self.runner.run(invocation)?;
        if !output.success {
            debug!(
                "{} exited with {:?}: {}",
                invocation.program,
                output.code,
                output.stderr.trim()
            );
        }
        Ok(output)
    }
}

/// Resolve a program name (or path) the same way the OS will when spawning it.
pub fn ensure_available(program: &str) -> Result<(), ExecError> {
    which::which(program)
        .map(|path| debug!("Using {} for {program}", path.display()))
        .map_err(|_| ExecError::NotFound {
            program: program.to_string(),
        })
}
