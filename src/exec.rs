//! Diagnostic command gateway.
//!
//! Runs a command from a closed allow-list with a client-supplied argument
//! string. The argument is split into argv entries and passed straight to
//! the executable; no shell ever sees it. Options are limited to the ones
//! the command's policy names, so a client cannot redirect output to a
//! file or read local files through an allowed tool.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{CommandPolicy, ExecConfig};
use crate::error::CapabilityError;

/// Characters permitted in a single argv entry. Covers hostnames, IPs,
/// URLs with query strings, flags and numeric options.
static ARG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._:/@%+=,~?&#\-]+$").expect("valid argument pattern")
});

/// Result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct CommandGateway {
    allowed: Vec<String>,
    policies: HashMap<String, CommandPolicy>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl CommandGateway {
    pub fn from_config(config: &ExecConfig) -> Self {
        Self {
            allowed: config.allowed_commands.clone(),
            policies: config.policies.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn is_allowed(&self, cmd: &str) -> bool {
        self.allowed.iter().any(|c| c == cmd)
    }

    /// Validate a request and turn its argument string into argv entries.
    ///
    /// Entries starting with `-` must be named by the command's policy;
    /// everything else is positional.
    pub fn build_args(&self, cmd: &str, value: &str) -> Result<Vec<String>, CapabilityError> {
        if !self.is_allowed(cmd) {
            return Err(CapabilityError::Disallowed(cmd.to_string()));
        }

        let policy = self.policies.get(cmd);
        let mut args = policy.map(|p| p.fixed_args.clone()).unwrap_or_default();
        let mut entries = value.split_whitespace();

        while let Some(arg) = entries.next() {
            check_chars(arg)?;

            if arg.starts_with('-') {
                let Some(policy) = policy else {
                    return Err(CapabilityError::InvalidArgument(format!(
                        "{cmd} accepts no options: {arg}"
                    )));
                };
                if policy.flags.iter().any(|f| f == arg) {
                    args.push(arg.to_string());
                } else if policy.valued_options.iter().any(|o| o == arg) {
                    let option_value = entries.next().ok_or_else(|| {
                        CapabilityError::InvalidArgument(format!("{arg} needs a value"))
                    })?;
                    check_chars(option_value)?;
                    if option_value.starts_with('-') {
                        return Err(CapabilityError::InvalidArgument(format!(
                            "{arg} needs a value, got {option_value}"
                        )));
                    }
                    args.push(arg.to_string());
                    args.push(option_value.to_string());
                } else {
                    return Err(CapabilityError::InvalidArgument(format!(
                        "option {arg} is not permitted for {cmd}"
                    )));
                }
            } else {
                if policy.is_some_and(|p| p.http_urls_only) && !is_http_url(arg) {
                    return Err(CapabilityError::InvalidArgument(format!(
                        "{cmd} only fetches http(s) URLs: {arg}"
                    )));
                }
                args.push(arg.to_string());
            }
        }

        Ok(args)
    }

    /// Run `cmd` with `value` as its arguments and capture the output.
    ///
    /// The child is killed if the returned future is dropped, so aborting
    /// the calling task also ends the process. Output past the cap is not
    /// read; the pipe is closed and the child is stopped.
    pub async fn run(&self, cmd: &str, value: &str) -> Result<CommandOutput, CapabilityError> {
        let args = self.build_args(cmd, value)?;

        info!(command = %cmd, args = ?args, "Executing diagnostic command");

        let mut child = Command::new(cmd)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let limit = self.max_output_bytes;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collect = async move {
            let ((stdout, stdout_cut), (stderr, stderr_cut)) =
                tokio::try_join!(read_capped(stdout, limit), read_capped(stderr, limit))?;
            if stdout_cut || stderr_cut {
                debug!("Output cap of {} bytes reached, stopping command", limit);
                if let Err(e) = child.start_kill() {
                    debug!("Command already exited: {}", e);
                }
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(CommandOutput {
                stdout,
                stderr,
                exit_code: status.code(),
            })
        };

        let result = tokio::time::timeout(self.timeout, collect)
            .await
            .map_err(|_| {
                warn!(command = %cmd, "Command timed out");
                CapabilityError::Timeout(self.timeout.as_secs())
            })??;

        debug!(
            command = %cmd,
            exit_code = ?result.exit_code,
            stdout_len = result.stdout.len(),
            "Command finished"
        );

        Ok(result)
    }
}

fn check_chars(arg: &str) -> Result<(), CapabilityError> {
    if ARG_PATTERN.is_match(arg) {
        Ok(())
    } else {
        Err(CapabilityError::InvalidArgument(arg.to_string()))
    }
}

fn is_http_url(arg: &str) -> bool {
    let lower = arg.to_ascii_lowercase();
    ["http://", "https://"]
        .iter()
        .any(|scheme| lower.len() > scheme.len() && lower.starts_with(scheme))
}

/// Read at most `limit` bytes, then drop the pipe. Returns the text and
/// whether anything was cut off.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<(String, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok((String::new(), false));
    };
    let mut buf = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut buf).await?;
    Ok(render_output(buf, limit))
}

fn render_output(mut buf: Vec<u8>, limit: usize) -> (String, bool) {
    if buf.len() <= limit {
        return (String::from_utf8_lossy(&buf).into_owned(), false);
    }
    buf.truncate(limit);
    // Drop a multi-byte character split by the cut.
    if let Err(e) = std::str::from_utf8(&buf) {
        if e.error_len().is_none() {
            buf.truncate(e.valid_up_to());
        }
    }
    (
        format!(
            "{}... [truncated at {} bytes]",
            String::from_utf8_lossy(&buf),
            limit
        ),
        true,
    )
}
