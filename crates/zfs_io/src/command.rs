use std::ffi::{OsStr, OsString};
use std::fmt;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::CommandError;
use crate::quote::shell_pipeline;
use crate::ssh::SshCommand;

/// Default SSH port; omitted from rendered command lines.
const DEFAULT_SSH_PORT: u16 = 22;

/// A program together with its argument vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
}

impl Invocation {
    /// Creates an invocation of `program` with no arguments.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument, builder style.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments, builder style.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends one argument in place.
    pub fn push_arg(&mut self, arg: impl Into<OsString>) {
        self.args.push(arg.into());
    }

    /// Inserts an argument at `index`, shifting later arguments right.
    pub fn insert_arg(&mut self, index: usize, arg: impl Into<OsString>) {
        let index = index.min(self.args.len());
        self.args.insert(index, arg.into());
    }

    /// Returns the program name.
    #[must_use]
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Returns the argument vector.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Builds a [`Command`] for this invocation. Standard streams are left
    /// for the caller to configure.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Remote endpoint of a control connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteHost {
    user: String,
    host: String,
    port: u16,
}

impl RemoteHost {
    /// Creates a remote endpoint.
    pub fn new(user: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port,
        }
    }

    /// Login user for the control connection.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// SSH port of the control connection.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Builds the `ssh` invocation that runs `remote_command` on this host.
    #[must_use]
    pub fn ssh(&self, remote_command: String) -> Invocation {
        let mut ssh = SshCommand::new(&self.host);
        if !self.user.is_empty() {
            ssh.set_user(&self.user);
        }
        if self.port != DEFAULT_SSH_PORT {
            ssh.set_port(self.port);
        }
        ssh.push_remote_arg(remote_command);
        ssh.into_invocation()
    }
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Where a storage command executes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Location {
    /// On this machine.
    #[default]
    Local,
    /// Through an SSH control connection.
    Remote(RemoteHost),
}

impl Location {
    /// Returns the remote endpoint, if any.
    #[must_use]
    pub const fn remote(&self) -> Option<&RemoteHost> {
        match self {
            Self::Local => None,
            Self::Remote(remote) => Some(remote),
        }
    }

    /// Reports whether commands run on this machine.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    /// Wraps `stages` so that they execute here as one shell pipeline.
    ///
    /// A single local stage is returned unchanged; several local stages run
    /// under `sh -c`. Remote stages are always rendered into a quoted command
    /// line for the remote shell.
    #[must_use]
    pub fn wrap(&self, stages: &[Invocation]) -> Invocation {
        match self {
            Self::Local if stages.len() == 1 => stages[0].clone(),
            Self::Local => Invocation::new("sh")
                .arg("-c")
                .arg(shell_pipeline(stages)),
            Self::Remote(remote) => remote.ssh(shell_pipeline(stages)),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote(remote) => remote.fmt(f),
        }
    }
}

/// Captured output of a successful command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, decoded lossily.
    pub stdout: String,
    /// Standard error, decoded lossily.
    pub stderr: String,
}

/// Runs `invocation` to completion with captured stdout and stderr.
///
/// Both streams are read concurrently by [`std::process::Child::wait_with_output`],
/// so large listings cannot deadlock against a full stderr pipe.
pub fn run_captured(invocation: &Invocation) -> Result<CommandOutput, CommandError> {
    let rendered = invocation.to_string();
    debug!(target: "snaprelay::cmd", command = %rendered, "running");

    let child = invocation
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CommandError::Spawn {
            command: rendered.clone(),
            source,
        })?;

    let output = child
        .wait_with_output()
        .map_err(|source| CommandError::Io {
            command: rendered.clone(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        Ok(CommandOutput { stdout, stderr })
    } else {
        Err(CommandError::Failed {
            command: rendered,
            status: output.status,
            stderr: stderr.trim().to_owned(),
        })
    }
}
