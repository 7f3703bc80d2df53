//! Line protocol spoken between the launcher and the process helper.
//!
//! Config phase (launcher -> helper), terminated by an empty line:
//!
//! ```text
//! program=<path>
//! arg=<value>          (repeatable, order preserved)
//! env=<KEY>=<VALUE>    (repeatable)
//! env=<KEY>            (repeatable, removes KEY from the target's environment)
//! workdir=<path>
//! ```
//!
//! The helper answers `started <pid>` or `error <message>`. Afterwards the
//! launcher may send `kill` or `quit`, and the helper reports `exited <code>`
//! exactly once.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::logging::log_debug;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ProtocolError {
    /// No complete line arrived before the deadline
    Timeout,
    /// The stream closed (or hung up) before a complete line arrived
    Closed,
    /// Underlying read/poll failure
    Io(io::Error),
    /// A value would break line framing
    EmbeddedNewline { key: &'static str },
    /// Config block ended without a usable `program=` line
    MissingProgram,
    /// A report line that doesn't match the grammar
    MalformedReport(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Timeout => write!(f, "timed out waiting for a line"),
            ProtocolError::Closed => write!(f, "stream closed"),
            ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
            ProtocolError::EmbeddedNewline { key } => {
                write!(f, "value for '{}' contains a newline", key)
            }
            ProtocolError::MissingProgram => write!(f, "no program specified"),
            ProtocolError::MalformedReport(line) => write!(f, "malformed report line '{}'", line),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        ProtocolError::Io(e)
    }
}

// ============================================================================
// Launch Config
// ============================================================================

/// Everything the helper needs to start one program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Inherited variables the target must not see
    pub unset_env: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn unset_env(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.env.remove(&key);
        if !self.unset_env.contains(&key) {
            self.unset_env.push(key);
        }
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Serialize as a config block, including the terminating empty line.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut out = String::new();

        push_line(&mut out, "program", &self.program.to_string_lossy())?;
        for arg in &self.args {
            push_line(&mut out, "arg", arg)?;
        }
        for (key, value) in &self.env {
            push_line(&mut out, "env", &format!("{}={}", key, value))?;
        }
        for key in &self.unset_env {
            push_line(&mut out, "env", key)?;
        }
        if let Some(dir) = &self.working_dir {
            push_line(&mut out, "workdir", &dir.to_string_lossy())?;
        }

        out.push('\n');
        Ok(out)
    }

    /// Parse a config block from text. Lines after the first empty line are ignored.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut builder = ConfigBuilder::default();
        for line in text.lines() {
            if builder.feed(line) {
                return builder.finish();
            }
        }
        Err(ProtocolError::Closed)
    }

    /// Read a config block from a live stream, failing if the whole block
    /// doesn't arrive within `timeout`.
    pub fn read_from<F: AsRawFd>(
        reader: &mut LineReader<F>,
        timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        let deadline = Instant::now() + timeout;
        let mut builder = ConfigBuilder::default();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = reader.read_line(Some(remaining))?;
            if builder.feed(&line) {
                return builder.finish();
            }
        }
    }
}

fn push_line(out: &mut String, key: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.contains('\n') {
        return Err(ProtocolError::EmbeddedNewline { key });
    }
    out.push_str(key);
    out.push('=');
    out.push_str(value);
    out.push('\n');
    Ok(())
}

/// Accumulates `key=value` lines until the terminating empty line.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    unset_env: Vec<String>,
    workdir: Option<String>,
}

impl ConfigBuilder {
    /// Feed one line (without its `\n`). Returns true once the block is complete.
    pub fn feed(&mut self, line: &str) -> bool {
        if line.is_empty() {
            return true;
        }

        // Lines without '=' and unknown keys are skipped.
        let Some((key, value)) = line.split_once('=') else {
            return false;
        };

        match key {
            "program" => self.program = value.to_string(),
            "arg" => self.args.push(value.to_string()),
            "env" => match value.split_once('=') {
                Some((name, val)) => {
                    self.unset_env.retain(|k| k != name);
                    self.env.insert(name.to_string(), val.to_string());
                }
                // Bare name, as putenv(3) treats it: remove the variable.
                None if !value.is_empty() => {
                    log_debug(&format!("protocol: env entry '{}' unsets the variable", value));
                    self.env.remove(value);
                    if !self.unset_env.iter().any(|k| k == value) {
                        self.unset_env.push(value.to_string());
                    }
                }
                None => {}
            },
            "workdir" => self.workdir = Some(value.to_string()),
            _ => {}
        }
        false
    }

    pub fn finish(self) -> Result<LaunchConfig, ProtocolError> {
        if self.program.is_empty() {
            return Err(ProtocolError::MissingProgram);
        }
        Ok(LaunchConfig {
            program: PathBuf::from(self.program),
            args: self.args,
            env: self.env,
            unset_env: self.unset_env,
            working_dir: self.workdir.filter(|w| !w.is_empty()).map(PathBuf::from),
        })
    }
}

// ============================================================================
// Reports & Commands
// ============================================================================

/// Helper -> launcher status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Started(i32),
    Error(String),
    Exited(i32),
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Keep error reports on a single line no matter what strerror says.
            Report::Error(msg) => write!(f, "error {}", msg.replace('\n', " ")),
            Report::Started(pid) => write!(f, "started {}", pid),
            Report::Exited(code) => write!(f, "exited {}", code),
        }
    }
}

impl FromStr for Report {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let malformed = || ProtocolError::MalformedReport(line.to_string());

        match word {
            "started" => rest.trim().parse().map(Report::Started).map_err(|_| malformed()),
            "exited" => rest.trim().parse().map(Report::Exited).map_err(|_| malformed()),
            "error" => Ok(Report::Error(rest.to_string())),
            _ => Err(malformed()),
        }
    }
}

/// Launcher -> helper runtime command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// SIGTERM the whole process group, keep monitoring
    Kill,
    /// Stop monitoring and exit now
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "kill" => Some(Command::Kill),
            "quit" => Some(Command::Quit),
            _ => None,
        }
    }

    pub fn as_line(&self) -> &'static str {
        match self {
            Command::Kill => "kill\n",
            Command::Quit => "quit\n",
        }
    }
}

// ============================================================================
// Line Reader
// ============================================================================

/// What a non-blocking readiness check saw on the input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    /// Hang-up or error with no data left to read
    HungUp,
    Idle,
}

/// Byte-at-a-time line reader over a raw fd with poll-based timeouts.
///
/// Reading one byte at a time means nothing past the newline is consumed,
/// so the fd can be handed to another reader afterwards. A partial line
/// that times out is kept and completed by the next call.
pub struct LineReader<F: AsRawFd> {
    source: F,
    pending: Vec<u8>,
}

impl<F: AsRawFd> LineReader<F> {
    pub fn new(source: F) -> Self {
        Self {
            source,
            pending: Vec::new(),
        }
    }

    /// Wait up to `timeout` for the fd to become readable.
    pub fn poll(&self, timeout: Duration) -> Result<Readiness, ProtocolError> {
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        let mut pfd = libc::pollfd {
            fd: self.source.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            // SAFETY: pfd is a valid pollfd on the stack and nfds is 1.
            let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ProtocolError::Io(err));
            }
            if ret == 0 {
                return Ok(Readiness::Idle);
            }
            // Buffered data may still be waiting even when HUP is also set.
            if pfd.revents & libc::POLLIN != 0 {
                return Ok(Readiness::Readable);
            }
            return Ok(Readiness::HungUp);
        }
    }

    /// Read one `\n`-terminated line (newline stripped).
    ///
    /// `None` waits forever. An empty `Ok` string is a real empty line;
    /// timeouts and closed streams are errors.
    pub fn read_line(&mut self, timeout: Option<Duration>) -> Result<String, ProtocolError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let wait = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::from_millis(i32::MAX as u64),
            };

            match self.poll(wait)? {
                Readiness::Idle => {
                    if deadline.is_some() {
                        return Err(ProtocolError::Timeout);
                    }
                    continue;
                }
                Readiness::HungUp => return Err(ProtocolError::Closed),
                Readiness::Readable => {}
            }

            let mut byte = 0u8;
            // SAFETY: reading a single byte into a valid stack location.
            let n = unsafe {
                libc::read(
                    self.source.as_raw_fd(),
                    &mut byte as *mut u8 as *mut libc::c_void,
                    1,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ProtocolError::Io(err));
            }
            if n == 0 {
                return Err(ProtocolError::Closed);
            }

            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return Ok(line);
            }
            self.pending.push(byte);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_round_trip_preserves_args_and_env() {
        let config = LaunchConfig::new("/games/Skyrim/SkyrimSE.exe")
            .args(["-forcesteamloader", "--", "arg with spaces", "a=b", ""])
            .env("WINEPREFIX", "/pfx")
            .env("DXVK_HUD", "fps=1")
            .env("EMPTY", "")
            .working_dir("/games/Skyrim");

        let decoded = LaunchConfig::decode(&config.encode().unwrap()).unwrap();
        assert_eq!(decoded, config);
        assert_eq!(decoded.env.get("DXVK_HUD").map(String::as_str), Some("fps=1"));
    }

    #[test]
    fn test_bare_env_entry_unsets_variable() {
        let config =
            LaunchConfig::decode("program=/bin/true\nenv=FOO\nenv=A=B=C\nenv=LANG=C\nenv=LANG\n\n")
                .unwrap();
        assert_eq!(config.env.get("A").map(String::as_str), Some("B=C"));
        assert!(!config.env.contains_key("LANG"));
        assert_eq!(config.unset_env, vec!["FOO", "LANG"]);

        let decoded = LaunchConfig::decode(&config.encode().unwrap()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_decode_ignores_unknown_and_malformed_lines() {
        let block = "program=/bin/true\nnonsense\ncolour=blue\narg=1\nworkdir=/a\nworkdir=/b\n\n";
        let config = LaunchConfig::decode(block).unwrap();
        assert_eq!(config.program, PathBuf::from("/bin/true"));
        assert_eq!(config.args, vec!["1"]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/b")));
    }

    #[test]
    fn test_decode_requires_program() {
        assert!(matches!(
            LaunchConfig::decode("arg=x\n\n"),
            Err(ProtocolError::MissingProgram)
        ));
        assert!(matches!(
            LaunchConfig::decode("program=/bin/true\n"),
            Err(ProtocolError::Closed)
        ));
    }

    #[test]
    fn test_encode_rejects_newlines() {
        let config = LaunchConfig::new("/bin/echo").arg("two\nlines");
        assert!(matches!(
            config.encode(),
            Err(ProtocolError::EmbeddedNewline { key: "arg" })
        ));
    }

    #[test]
    fn test_report_lines() {
        assert_eq!(Report::Started(42).to_string(), "started 42");
        assert_eq!(Report::Exited(143).to_string(), "exited 143");
        assert_eq!("exited 7".parse::<Report>().unwrap(), Report::Exited(7));
        assert_eq!(
            "error exec failed: No such file".parse::<Report>().unwrap(),
            Report::Error("exec failed: No such file".to_string())
        );
        assert!("started abc".parse::<Report>().is_err());
        assert!("hello".parse::<Report>().is_err());
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("kill"), Some(Command::Kill));
        assert_eq!(Command::parse("quit"), Some(Command::Quit));
        assert_eq!(Command::parse("dance"), None);
    }

    #[test]
    fn test_line_reader_distinguishes_empty_line_timeout_and_close() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let mut lines = LineReader::new(reader);

        writer.write_all(b"hello\n\n").unwrap();
        assert_eq!(lines.read_line(Some(Duration::from_secs(1))).unwrap(), "hello");
        assert_eq!(lines.read_line(Some(Duration::from_secs(1))).unwrap(), "");

        assert!(matches!(
            lines.read_line(Some(Duration::from_millis(50))),
            Err(ProtocolError::Timeout)
        ));

        drop(writer);
        assert!(matches!(
            lines.read_line(Some(Duration::from_secs(1))),
            Err(ProtocolError::Closed)
        ));
    }

    #[test]
    fn test_line_reader_keeps_partial_line_after_timeout() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let mut lines = LineReader::new(reader);

        writer.write_all(b"ki").unwrap();
        assert!(matches!(
            lines.read_line(Some(Duration::from_millis(50))),
            Err(ProtocolError::Timeout)
        ));
        writer.write_all(b"ll\n").unwrap();
        assert_eq!(lines.read_line(Some(Duration::from_secs(1))).unwrap(), "kill");
    }

    #[test]
    fn test_read_config_block_from_stream() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let mut lines = LineReader::new(reader);

        let config = LaunchConfig::new("/bin/sh").arg("-c").arg("exit 0");
        writer.write_all(config.encode().unwrap().as_bytes()).unwrap();

        let read = LaunchConfig::read_from(&mut lines, Duration::from_secs(1)).unwrap();
        assert_eq!(read, config);
    }

    #[test]
    fn test_read_config_times_out_without_terminator() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let mut lines = LineReader::new(reader);

        writer.write_all(b"program=/bin/true\n").unwrap();
        assert!(matches!(
            LaunchConfig::read_from(&mut lines, Duration::from_millis(100)),
            Err(ProtocolError::Timeout)
        ));
    }
}
