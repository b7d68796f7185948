//! Privileged command execution. AD requires some mutations (DNS record
//! add/delete, account provisioning) to go through `samba-tool`, which in
//! turn needs a Kerberos ticket. `kinit` writes a single shared credential
//! cache, so authentication is serialized process-wide behind a mutex and
//! cached for the configured ticket lifetime.

use crate::config::ToolSettings;
use crate::error::{Error, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

#[derive(Clone, Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// External tool collaborator. `authenticate` is idempotent and cheap to
/// call repeatedly; `run` invokes the management tool with an already
/// acquired credential. A non-zero exit or stderr output is a soft-fail
/// signal: callers verify success by re-reading directory state.
pub trait PrivilegedRunner: Send + Sync {
    fn authenticate(&self) -> Result<()>;
    fn run(&self, args: &[&str]) -> Result<ToolOutput>;
}

pub struct SambaToolRunner {
    settings: ToolSettings,
    last_auth: Mutex<Option<Instant>>,
}

impl SambaToolRunner {
    pub fn new(settings: ToolSettings) -> Self {
        SambaToolRunner {
            settings,
            last_auth: Mutex::new(None),
        }
    }

    /// First one or two argument words, for logging without credentials.
    fn command_label(args: &[&str]) -> String {
        args.iter().take(2).copied().collect::<Vec<_>>().join(" ")
    }
}

impl PrivilegedRunner for SambaToolRunner {
    fn authenticate(&self) -> Result<()> {
        let mut last = self
            .last_auth
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(at) = *last {
            if at.elapsed() < self.settings.ticket_lifetime {
                return Ok(());
            }
        }

        log::debug!("acquiring ticket for {}", self.settings.principal);
        let mut child = Command::new(&self.settings.kinit)
            .arg(&self.settings.principal)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(self.settings.password.as_bytes())?;
            stdin.write_all(b"\n")?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::Auth(format!(
                "kinit for {} failed: {}",
                self.settings.principal, stderr
            )));
        }

        *last = Some(Instant::now());
        Ok(())
    }

    fn run(&self, args: &[&str]) -> Result<ToolOutput> {
        self.authenticate()?;

        let label = Self::command_label(args);
        log::debug!("running {} {} ({} args)", self.settings.samba_tool, label, args.len());

        let output = Command::new(&self.settings.samba_tool).args(args).output()?;
        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if !result.stderr.trim().is_empty() {
            log::warn!(
                "{} {}: stderr: {}",
                self.settings.samba_tool,
                label,
                result.stderr.trim()
            );
        }
        Ok(result)
    }
}
