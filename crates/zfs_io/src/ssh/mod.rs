//! Builder for the `ssh` control connection.
//!
//! The builder mirrors how the command line is typed by hand: options first,
//! then the `user@host` target, then the remote command words. Batch mode is
//! always on because a scheduled job can never answer a password prompt.

use std::ffi::OsString;

use crate::Invocation;

/// Assembles an `ssh` invocation.
#[derive(Clone, Debug)]
pub struct SshCommand {
    host: OsString,
    user: Option<OsString>,
    port: Option<u16>,
    remote_args: Vec<OsString>,
}

impl SshCommand {
    /// Creates a builder targeting `host`.
    pub fn new(host: impl Into<OsString>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            remote_args: Vec::new(),
        }
    }

    /// Sets the login user.
    pub fn set_user(&mut self, user: impl Into<OsString>) -> &mut Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the port of the control connection.
    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = Some(port);
        self
    }

    /// Appends a word of the remote command.
    pub fn push_remote_arg(&mut self, arg: impl Into<OsString>) -> &mut Self {
        self.remote_args.push(arg.into());
        self
    }

    fn target(&self) -> Option<OsString> {
        if self.host.is_empty() {
            return None;
        }

        let host = self.host.to_string_lossy();
        let host = if host.contains(':') && !host.starts_with('[') {
            OsString::from(format!("[{host}]"))
        } else {
            self.host.clone()
        };

        Some(match &self.user {
            Some(user) => {
                let mut target = user.clone();
                target.push("@");
                target.push(host);
                target
            }
            None => host,
        })
    }

    /// Finalises the builder into a runnable [`Invocation`].
    #[must_use]
    pub fn into_invocation(self) -> Invocation {
        let mut args = vec![OsString::from("-oBatchMode=yes")];
        if let Some(port) = self.port {
            args.push(OsString::from("-p"));
            args.push(OsString::from(port.to_string()));
        }
        if let Some(target) = self.target() {
            args.push(target);
        }
        args.extend(self.remote_args);

        Invocation::new("ssh").args(args)
    }
}

#[cfg(test)]
mod tests;
