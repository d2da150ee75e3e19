//! Command channel to the controller board
//!
//! The controller is driven by shell commands; one command is in flight at a
//! time and each call blocks until the command exits.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, warn};

/// A command channel shared between the worker and `main` (for `stop`)
pub type Shared = Arc<Mutex<dyn CommandChannel>>;

pub fn shared(ch: impl CommandChannel + 'static) -> Shared {
    Arc::new(Mutex::new(ch))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Exit code; `None` when killed by a signal
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        CommandOutput {
            stdout: stdout.lines().map(String::from).collect(),
            stderr: Vec::new(),
            code: Some(0),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        CommandOutput {
            stdout: Vec::new(),
            stderr: stderr.lines().map(String::from).collect(),
            code: Some(code),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Integer in the last token of the first output line, e.g. `lines: 0x4`
    pub fn last_int(&self) -> Option<u64> {
        self.stdout
            .first()
            .and_then(|l| l.split_whitespace().last())
            .and_then(parse_int)
    }
}

/// Parse an integer with automatic base: `0x`, `0o`, `0b` or decimal
pub fn parse_int(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, radix) = match s.get(..2) {
        Some("0x") | Some("0X") => (&s[2..], 16),
        Some("0o") | Some("0O") => (&s[2..], 8),
        Some("0b") | Some("0B") => (&s[2..], 2),
        _ => (s, 10),
    };
    u64::from_str_radix(&digits.replace('_', ""), radix).ok()
}

pub trait CommandChannel: Send {
    /// Run one command; `Err` only when it could not be run at all
    fn run(&mut self, cmd: &str) -> Result<CommandOutput>;

    /// Run a command that is expected to succeed
    fn exec(&mut self, cmd: &str) -> Result<CommandOutput> {
        debug!("{}", cmd);
        let out = self.run(cmd)?;
        if !out.success() {
            return Err(Error::Command {
                cmd: cmd.to_string(),
                message: match out.stderr.is_empty() {
                    true => format!("exit code {:?}", out.code),
                    false => out.stderr.join("; "),
                },
            });
        }
        for line in out.stderr.iter() {
            warn!("{}: {}", cmd, line);
        }
        Ok(out)
    }

    /// Run a command and read an integer from its first output line
    fn exec_int(&mut self, cmd: &str) -> Result<u64> {
        let out = self.exec(cmd)?;
        out.last_int()
            .ok_or_else(|| Error::Parse(out.stdout.first().cloned().unwrap_or_default()))
    }
}

/// Runs commands on the controller through the system `ssh` client.
///
/// Connections are multiplexed so that each command does not pay for a new
/// handshake.
pub struct SshChannel {
    target: String,
    port: Option<u16>,
    identity: Option<PathBuf>,
}

impl SshChannel {
    /// `addr` may be a host alias from `~/.ssh/config`
    pub fn new(addr: &str, user: Option<&str>, port: Option<u16>, identity: Option<PathBuf>) -> Self {
        let target = match user {
            Some(u) => format!("{}@{}", u, addr),
            None => addr.to_string(),
        };
        SshChannel { target, port, identity }
    }

    fn command(&self, cmd: &str) -> Command {
        let mut c = Command::new("ssh");
        c.args([
            "-o", "BatchMode=yes",
            "-o", "ControlMaster=auto",
            "-o", "ControlPath=/tmp/pdcctl-%r@%h:%p",
            "-o", "ControlPersist=60",
        ]);
        if let Some(p) = self.port {
            c.arg("-p").arg(p.to_string());
        }
        if let Some(i) = &self.identity {
            c.arg("-i").arg(i);
        }
        c.arg(&self.target).arg(cmd);
        return c;
    }
}

impl CommandChannel for SshChannel {
    fn run(&mut self, cmd: &str) -> Result<CommandOutput> {
        let out = self
            .command(cmd)
            .output()
            .map_err(|e| Error::Connect(format!("{}: {}", self.target, e)))?;
        // ssh itself reports connection failures with exit code 255
        if out.status.code() == Some(255) {
            return Err(Error::Connect(format!(
                "{}: {}",
                self.target,
                String::from_utf8_lossy(&out.stderr).trim(),
            )));
        }
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).lines().map(String::from).collect(),
            stderr: String::from_utf8_lossy(&out.stderr).lines().map(String::from).collect(),
            code: out.status.code(),
        })
    }
}

type Matcher = Box<dyn Fn(&str) -> bool + Send>;

/// Answers commands from canned responses and records every command sent.
///
/// Commands without a matching response succeed with no output. Later
/// responses take precedence over earlier ones.
pub struct ScriptedChannel {
    log: Arc<Mutex<Vec<String>>>,
    responses: Vec<(Matcher, CommandOutput)>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        ScriptedChannel {
            log: Arc::new(Mutex::new(Vec::new())),
            responses: Vec::new(),
        }
    }

    /// Respond to commands starting with `prefix`
    pub fn respond(self, prefix: &str, out: CommandOutput) -> Self {
        let prefix = prefix.to_string();
        self.respond_if(move |c| c.starts_with(&prefix), out)
    }

    pub fn respond_if(mut self, matcher: impl Fn(&str) -> bool + Send + 'static, out: CommandOutput) -> Self {
        self.responses.push((Box::new(matcher), out));
        return self;
    }

    /// A healthy board with `n_pdc` PDCs of which those in `pdc_mask` are
    /// powered, and no status error.
    pub fn board(n_pdc: usize, pdc_mask: u32) -> Self {
        let status = crate::fsm::STATUS_FLAGS
            .iter()
            .map(|s| format!("{}: 0x00000000", s))
            .collect::<Vec<_>>()
            .join("\n");
        ScriptedChannel::new()
            .respond("boardInfo --numasic", CommandOutput::ok(&n_pdc.to_string()))
            .respond("boardInfo -l", CommandOutput::ok("simulated board"))
            .respond("ctlCfg -P", CommandOutput::ok(&format!("power good: 0x{:08x}", pdc_mask)))
            .respond("rtnEn -n", CommandOutput::ok(&format!("lines: {}", n_pdc)))
            .respond("rtnEn -s", CommandOutput::ok(&format!("enabled: 0x{:08x}", pdc_mask)))
            .respond_if(|c| c.starts_with("ioDelaySet") && c.ends_with(" -n"), CommandOutput::ok("lines: 2"))
            .respond("ctlCfg -s", CommandOutput::ok(&status))
            .respond("pdcTime -g", CommandOutput::ok("TIME: 0xdede"))
    }

    /// Handle on the command log, usable after the channel is shared
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl Default for ScriptedChannel {
    fn default() -> Self {
        ScriptedChannel::new()
    }
}

impl CommandChannel for ScriptedChannel {
    fn run(&mut self, cmd: &str) -> Result<CommandOutput> {
        self.log.lock().push(cmd.to_string());
        let out = self
            .responses
            .iter()
            .rev()
            .find(|(m, _)| m(cmd))
            .map(|(_, o)| o.clone())
            .unwrap_or_else(|| CommandOutput::ok(""));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_with_base() {
        assert_eq!(Some(8), parse_int("8"));
        assert_eq!(Some(0xF7), parse_int("0xF7"));
        assert_eq!(Some(0xdede), parse_int(" 0xdede\n"));
        assert_eq!(Some(5), parse_int("0b101"));
        assert_eq!(None, parse_int("0xZZ"));
        assert_eq!(None, parse_int(""));
    }

    #[test]
    fn last_token_of_first_line() {
        assert_eq!(Some(3), CommandOutput::ok("lines: 3\nignored 7").last_int());
        assert_eq!(Some(0x1), CommandOutput::ok("0x1").last_int());
        assert_eq!(None, CommandOutput::ok("").last_int());
    }

    #[test]
    fn failing_command_is_an_error() {
        let mut ch = ScriptedChannel::new().respond("clkSet", CommandOutput::failed(1, "bad period"));
        match ch.exec("clkSet -P 10 --ns") {
            Err(Error::Command { message, .. }) => assert_eq!("bad period", message),
            other => panic!("unexpected {:?}", other),
        }
        assert!(ch.exec("ctlCmd -c RSTN_FULL").is_ok());
        assert_eq!(2, ch.commands().len());
    }

    #[test]
    fn later_responses_win() {
        let mut ch = ScriptedChannel::board(8, 0x1).respond("ctlCfg -P", CommandOutput::ok("0x0"));
        assert_eq!(0, ch.exec_int("ctlCfg -P").unwrap());
        assert_eq!(8, ch.exec_int("boardInfo --numasic --raw").unwrap());
        assert_eq!(2, ch.exec_int("ioDelaySet --signal CFG_DATA -n").unwrap());
    }
}
