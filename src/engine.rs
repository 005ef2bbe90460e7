//! Connection to the external task engine.
//!
//! The engine speaks JSON Lines: one [`EngineMessage`] per line on its
//! stdout, tagged by `"type"`:
//!
//! ```text
//! {"type":"progress","id":1,"state":"running","current":2,"total":10}
//! {"type":"log","name":"build","level":"info","message":"compiled 10 files"}
//! {"type":"result","success":true}
//! ```
//!
//! Reader tasks decode lines as they arrive and push them into one bounded
//! channel. Whoever owns the [`EngineRun`] is the only consumer, which keeps
//! terminal writes serialized no matter how many tasks the engine runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::lifecycle::ProgressEvent;

/// Errors from talking to the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No engine command configured. Set [engine] command in settings.toml")]
    NotConfigured,

    #[error("Failed to start engine '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Failed to open event stream {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Engine stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed engine message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Engine reader task failed: {0}")]
    Reader(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A log line forwarded by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_level")]
    pub level: String,
    pub message: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl LogEntry {
    pub fn new(name: impl Into<String>, level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: level.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

/// Final outcome of a run as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RunResult {
    /// Pretty JSON for display, without the bulky `info` field.
    pub fn to_display_json(&self) -> String {
        let mut object = self.extra.clone();
        object.remove("info");
        object.insert("success".to_string(), self.success.into());
        serde_json::to_string_pretty(&object).unwrap_or_else(|_| format!("{self:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineMessage {
    Progress(ProgressEvent),
    Log(LogEntry),
    Result(RunResult),
}

/// Decode one protocol line.
pub fn decode_line(line: &str) -> EngineResult<EngineMessage> {
    Ok(serde_json::from_str(line)?)
}

/// Where engine messages come from.
#[derive(Debug, Clone)]
pub enum EngineSource {
    /// Spawn `program args...` and read its stdout.
    Command { program: String, args: Vec<String> },
    /// Replay a recorded stream; `None` reads stdin.
    Replay(Option<PathBuf>),
}

impl EngineSource {
    /// Build a command source from the configured command line plus extra args.
    pub fn command(command: &[String], extra: impl IntoIterator<Item = String>) -> EngineResult<Self> {
        let (program, args) = command.split_first().ok_or(EngineError::NotConfigured)?;
        Ok(EngineSource::Command {
            program: program.clone(),
            args: args.iter().cloned().chain(extra).collect(),
        })
    }
}

/// A live engine connection.
pub struct EngineRun {
    messages: mpsc::Receiver<EngineMessage>,
    child: Option<Child>,
    readers: Vec<JoinHandle<EngineResult<()>>>,
}

impl EngineRun {
    /// Start reading from `source`.
    pub async fn start(source: &EngineSource, capacity: usize) -> EngineResult<Self> {
        let (tx, messages) = mpsc::channel(capacity.max(1));

        match source {
            EngineSource::Command { program, args } => {
                tracing::debug!(target: "engine", "spawning {program} {}", args.join(" "));
                let mut child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|source| EngineError::Spawn {
                        program: program.clone(),
                        source,
                    })?;

                let mut readers = Vec::with_capacity(2);
                if let Some(stdout) = child.stdout.take() {
                    readers.push(tokio::spawn(pump(BufReader::new(stdout), tx.clone())));
                }
                if let Some(stderr) = child.stderr.take() {
                    readers.push(tokio::spawn(pump_stderr(BufReader::new(stderr), tx)));
                }
                Ok(Self {
                    messages,
                    child: Some(child),
                    readers,
                })
            }
            EngineSource::Replay(Some(path)) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|source| EngineError::Open {
                        path: path.clone(),
                        source,
                    })?;
                Ok(Self::from_reader(BufReader::new(file), tx, messages))
            }
            EngineSource::Replay(None) => {
                Ok(Self::from_reader(BufReader::new(tokio::io::stdin()), tx, messages))
            }
        }
    }

    /// Replay a recorded stream from any async reader.
    pub fn from_stream<R>(reader: R, capacity: usize) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, messages) = mpsc::channel(capacity.max(1));
        Self::from_reader(reader, tx, messages)
    }

    fn from_reader<R>(
        reader: R,
        tx: mpsc::Sender<EngineMessage>,
        messages: mpsc::Receiver<EngineMessage>,
    ) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        Self {
            messages,
            child: None,
            readers: vec![tokio::spawn(pump(reader, tx))],
        }
    }

    /// Next message, or `None` once every reader has finished.
    pub async fn next(&mut self) -> Option<EngineMessage> {
        self.messages.recv().await
    }

    /// Stop the engine process, if any, and stop reading from it.
    pub async fn kill(&mut self) -> EngineResult<()> {
        if let Some(child) = self.child.as_mut() {
            tracing::debug!(target: "engine", "killing engine process");
            child.kill().await?;
        }
        for reader in &self.readers {
            reader.abort();
        }
        Ok(())
    }

    /// Wait for readers and the process to finish.
    pub async fn finish(mut self) -> EngineResult<Option<ExitStatus>> {
        self.messages.close();
        for reader in self.readers.drain(..) {
            match reader.await {
                Ok(result) => result?,
                Err(e) if e.is_cancelled() => {}
                Err(e) => return Err(EngineError::Reader(e.to_string())),
            }
        }
        match self.child.as_mut() {
            Some(child) => Ok(Some(child.wait().await?)),
            None => Ok(None),
        }
    }
}

/// Read one line, replacing invalid UTF-8 instead of failing the stream.
///
/// Returns `None` at end of input. The line terminator is stripped.
async fn read_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> EngineResult<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

/// Forward decoded stdout lines. Undecodable lines become log entries.
async fn pump<R>(mut reader: R, tx: mpsc::Sender<EngineMessage>) -> EngineResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = read_lossy_line(&mut reader, &mut buf).await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // debug only: stderr may be showing the live region
        let message = decode_line(trimmed).unwrap_or_else(|e| {
            tracing::debug!(target: "engine", "line {line_no}: {e}");
            EngineMessage::Log(LogEntry::new("engine", "warn", trimmed))
        });
        if tx.send(message).await.is_err() {
            // consumer went away; nothing left to deliver to
            break;
        }
    }
    Ok(())
}

async fn pump_stderr<R>(mut reader: R, tx: mpsc::Sender<EngineMessage>) -> EngineResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    while let Some(line) = read_lossy_line(&mut reader, &mut buf).await? {
        let entry = LogEntry::new("stderr", "warn", line);
        if tx.send(EngineMessage::Log(entry)).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Display path for a replay source.
pub fn describe_replay(path: Option<&Path>) -> String {
    path.map_or_else(|| "<stdin>".to_string(), |p| p.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TaskState;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_decode_messages() {
        let progress = decode_line(r#"{"type":"progress","id":1,"state":"waiting"}"#).unwrap();
        assert!(matches!(
            progress,
            EngineMessage::Progress(ProgressEvent { id: 1, state: TaskState::Waiting, .. })
        ));

        let log = decode_line(r#"{"type":"log","message":"hello"}"#).unwrap();
        assert_eq!(log, EngineMessage::Log(LogEntry::new("", "info", "hello")));

        let result = decode_line(r#"{"type":"result","success":false,"error":"boom"}"#).unwrap();
        let EngineMessage::Result(result) = result else {
            panic!("expected a result");
        };
        assert!(!result.success);
        assert_eq!(result.extra["error"], "boom");
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(matches!(
            decode_line(r#"{"type":"bogus"}"#),
            Err(EngineError::Decode(_))
        ));
    }

    #[test]
    fn test_result_display_drops_info() {
        let result: RunResult =
            serde_json::from_str(r#"{"success":true,"info":{"big":1},"outputPath":"dist"}"#).unwrap();
        let json = result.to_display_json();
        assert!(json.contains("\"success\": true"));
        assert!(json.contains("\"outputPath\": \"dist\""));
        assert!(!json.contains("info"));
    }

    #[test]
    fn test_log_entry_display() {
        assert_eq!(LogEntry::new("build", "info", "ok").to_string(), "build: ok");
        assert_eq!(LogEntry::new("", "info", "ok").to_string(), "ok");
    }

    #[test]
    fn test_command_source_needs_program() {
        assert!(matches!(
            EngineSource::command(&[], Vec::new()),
            Err(EngineError::NotConfigured)
        ));

        let source = EngineSource::command(
            &["engine".to_string(), "--json".to_string()],
            vec!["app:build".to_string()],
        )
        .unwrap();
        let EngineSource::Command { program, args } = source else {
            panic!("expected a command source");
        };
        assert_eq!(program, "engine");
        assert_eq!(args, vec!["--json", "app:build"]);
    }

    #[tokio::test]
    async fn test_stream_delivers_in_order_and_keeps_garbage_as_logs() {
        let input = concat!(
            "{\"type\":\"progress\",\"id\":1,\"state\":\"running\",\"current\":1,\"total\":2}\n",
            "\n",
            "not json\n",
            "{\"type\":\"result\",\"success\":true}\n",
        );
        let mut run = EngineRun::from_stream(input.as_bytes(), 1);

        let mut messages = Vec::new();
        while let Some(message) = run.next().await {
            messages.push(message);
        }
        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0], EngineMessage::Progress(_)));
        assert_eq!(
            messages[1],
            EngineMessage::Log(LogEntry::new("engine", "warn", "not json"))
        );
        assert!(matches!(messages[2], EngineMessage::Result(RunResult { success: true, .. })));

        assert_eq!(run.finish().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_the_stream() {
        let input: &'static [u8] =
            b"\xff\xfe garbage\r\n{\"type\":\"result\",\"success\":true}\n";
        let mut run = EngineRun::from_stream(input, 4);

        let mut messages = Vec::new();
        while let Some(message) = run.next().await {
            messages.push(message);
        }
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            EngineMessage::Log(LogEntry::new("engine", "warn", "\u{fffd}\u{fffd} garbage"))
        );
        assert!(matches!(messages[1], EngineMessage::Result(RunResult { success: true, .. })));
        assert_eq!(run.finish().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stderr_lines_survive_invalid_utf8() {
        let (tx, mut rx) = mpsc::channel(4);
        let input: &'static [u8] = b"caf\xe9\nlast line without newline";
        pump_stderr(input, tx).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(EngineMessage::Log(LogEntry::new("stderr", "warn", "caf\u{fffd}")))
        );
        assert_eq!(
            rx.recv().await,
            Some(EngineMessage::Log(LogEntry::new("stderr", "warn", "last line without newline")))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_kill_stops_a_stream_that_never_ends() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut run = EngineRun::from_stream(BufReader::new(reader), 4);

        writer
            .write_all(b"{\"type\":\"log\",\"message\":\"hi\"}\n")
            .await
            .unwrap();
        assert_eq!(
            run.next().await,
            Some(EngineMessage::Log(LogEntry::new("", "info", "hi")))
        );

        run.kill().await.unwrap();
        assert_eq!(run.finish().await.unwrap(), None);
        drop(writer);
    }
}
