//! Boundary to the external measurement engine.
//!
//! The engine is opaque: it is started with a [`Settings`] document and then
//! produces serialized events until it is done. This module defines that
//! contract ([`Engine`], [`TaskHandle`]) and the two engines shipped with the
//! application.

use crate::models::{EngineConfig, Settings};
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Result of waiting for the next event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled {
    /// One serialized event
    Event(String),
    /// Nothing arrived within the timeout; ask again
    Pending,
    /// The task has finished and will produce nothing more
    Done,
}

/// Errors reported by the engine or its event stream
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to serialize settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("event stream failed: {0}")]
    Stream(#[source] std::io::Error),

    #[error("engine exited with {0}")]
    ExitStatus(String),

    #[error("engine failure: {0}")]
    Failed(String),
}

/// One in-flight measurement run.
///
/// Lifecycle is created → running → finished. Once [`is_done`](Self::is_done)
/// returns `true` it stays `true`.
#[cfg_attr(test, mockall::automock)]
pub trait TaskHandle: Send {
    fn is_done(&self) -> bool;

    /// Wait up to `timeout` for the next serialized event.
    fn next_event(&mut self, timeout: Duration) -> Result<Polled, EngineError>;
}

/// The external measurement engine
#[cfg_attr(test, mockall::automock)]
pub trait Engine: Send + Sync {
    /// Human-readable engine version, shown at startup
    fn version(&self) -> String;

    /// Start one Nettest with `settings`.
    fn start(&self, settings: &Settings) -> Result<Box<dyn TaskHandle>, EngineError>;
}

/// One step of a scripted run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Event(String),
    /// A poll that times out without an event
    Pending,
    /// The task fails with this message and finishes
    Fail(String),
}

/// Engine that replays a fixed list of events.
///
/// Used for the built-in demo, for replaying recorded runs from a JSON-lines
/// file and in tests. Remembers the settings of every start.
pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
    delay: Duration,
    started: Mutex<Vec<Settings>>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            delay: Duration::ZERO,
            started: Mutex::new(Vec::new()),
        }
    }

    /// Engine replaying `events` verbatim
    pub fn from_events<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(events.into_iter().map(|e| ScriptStep::Event(e.into())).collect())
    }

    /// Engine replaying the non-empty lines of a JSON-lines file
    pub fn from_jsonl_file(path: &camino::Utf8Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file: {}", path))?;
        Ok(Self::from_events(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        ))
    }

    /// A short NDT-shaped run, used when no engine is configured
    pub fn demo() -> Self {
        let progress = |p: f64, msg: &str| {
            format!(
                r#"{{"key":"status.progress","value":{{"percentage":{},"message":"{}"}}}}"#,
                p, msg
            )
        };
        let log = |msg: &str| {
            format!(
                r#"{{"key":"log","value":{{"log_level":"INFO","message":"{}"}}}}"#,
                msg
            )
        };
        let perf = |direction: &str, kbps: f64| {
            format!(
                r#"{{"key":"status.update.performance","value":{{"direction":"{}","elapsed":1.0,"num_streams":1,"speed_kbps":{}}}}}"#,
                direction, kbps
            )
        };

        Self::from_events([
            r#"{"key":"status.queued","value":{}}"#.to_string(),
            r#"{"key":"status.started","value":{}}"#.to_string(),
            log("demo engine: no external engine configured"),
            progress(0.1, "geoip lookup"),
            progress(0.2, "open report"),
            log("connecting to measurement server"),
            progress(0.4, "download"),
            perf("download", 18450.3),
            perf("download", 19012.8),
            progress(0.7, "upload"),
            perf("upload", 5210.0),
            progress(1.0, "done"),
            r#"{"key":"measurement","value":{"idx":0,"json_str":"{\"test_name\":\"ndt\",\"test_keys\":{\"simple\":{\"download\":19012.8,\"upload\":5210.0}}}"}}"#.to_string(),
            r#"{"key":"status.end","value":{"downloaded_kb":2404.1,"uploaded_kb":651.2,"failure":""}}"#.to_string(),
            r#"{"key":"task_terminated","value":{}}"#.to_string(),
        ])
        .with_delay(Duration::from_millis(150))
    }

    /// Sleep before handing out each event
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Settings passed to every `start` so far
    pub fn started_with(&self) -> Vec<Settings> {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Engine for ScriptedEngine {
    fn version(&self) -> String {
        format!("scripted ({} steps)", self.steps.len())
    }

    fn start(&self, settings: &Settings) -> Result<Box<dyn TaskHandle>, EngineError> {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(settings.clone());

        Ok(Box::new(ScriptedTask {
            steps: self.steps.iter().cloned().collect(),
            delay: self.delay,
            done: false,
        }))
    }
}

struct ScriptedTask {
    steps: VecDeque<ScriptStep>,
    delay: Duration,
    done: bool,
}

impl TaskHandle for ScriptedTask {
    fn is_done(&self) -> bool {
        self.done
    }

    fn next_event(&mut self, _timeout: Duration) -> Result<Polled, EngineError> {
        match self.steps.pop_front() {
            None => {
                self.done = true;
                Ok(Polled::Done)
            }
            Some(ScriptStep::Event(raw)) => {
                if !self.delay.is_zero() {
                    std::thread::sleep(self.delay);
                }
                Ok(Polled::Event(raw))
            }
            Some(ScriptStep::Pending) => Ok(Polled::Pending),
            Some(ScriptStep::Fail(message)) => {
                self.done = true;
                Err(EngineError::Failed(message))
            }
        }
    }
}

/// Engine running as a separate program.
///
/// The settings document is written to the program's stdin, which is then
/// closed; the program prints one JSON event per line on stdout and exits.
/// A non-zero exit status is reported as [`EngineError::ExitStatus`].
pub struct ProcessEngine {
    program: Utf8PathBuf,
    args: Vec<String>,
    runtime: tokio::runtime::Handle,
}

enum ProcessMessage {
    Line(String),
    Failed(std::io::Error),
    Exited(std::io::Result<ExitStatus>),
}

impl ProcessEngine {
    pub fn new(program: Utf8PathBuf, args: Vec<String>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            program,
            args,
            runtime,
        }
    }
}

impl Engine for ProcessEngine {
    fn version(&self) -> String {
        format!("external ({})", self.program)
    }

    fn start(&self, settings: &Settings) -> Result<Box<dyn TaskHandle>, EngineError> {
        let document = settings.to_json()?;

        let mut child = {
            // tokio::process needs the runtime context to register the child
            let _guard = self.runtime.enter();
            Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| EngineError::Spawn {
                    program: self.program.clone(),
                    source,
                })?
        };

        tracing::info!("Launched engine {} (pid {:?})", self.program, child.id());

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (tx, rx) = mpsc::unbounded_channel();

        self.runtime.spawn(async move {
            if let Some(mut stdin) = stdin {
                let written = async {
                    stdin.write_all(document.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.shutdown().await
                }
                .await;
                match written {
                    Ok(()) => {}
                    // Engine closed stdin early; its events may still be on stdout
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                        tracing::debug!("Engine closed stdin before reading settings: {}", e);
                    }
                    Err(e) => {
                        let _ = tx.send(ProcessMessage::Failed(e));
                        let _ = child.kill().await;
                        return;
                    }
                }
            }

            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if tx.send(ProcessMessage::Line(line)).is_err() {
                                // Nobody is consuming events any more
                                let _ = child.kill().await;
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(ProcessMessage::Failed(e));
                            let _ = child.kill().await;
                            return;
                        }
                    }
                }
            }

            let _ = tx.send(ProcessMessage::Exited(child.wait().await));
        });

        Ok(Box::new(ProcessTask {
            events: rx,
            runtime: self.runtime.clone(),
            done: false,
        }))
    }
}

struct ProcessTask {
    events: mpsc::UnboundedReceiver<ProcessMessage>,
    runtime: tokio::runtime::Handle,
    done: bool,
}

impl TaskHandle for ProcessTask {
    fn is_done(&self) -> bool {
        self.done
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Polled, EngineError> {
        if self.done {
            return Ok(Polled::Done);
        }

        // Called from the run's worker thread, never from a runtime thread
        let events = &mut self.events;
        let received = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, events.recv()).await });

        match received {
            Err(_elapsed) => Ok(Polled::Pending),
            Ok(None) => {
                self.done = true;
                Ok(Polled::Done)
            }
            Ok(Some(ProcessMessage::Line(line))) => {
                if line.trim().is_empty() {
                    Ok(Polled::Pending)
                } else {
                    Ok(Polled::Event(line))
                }
            }
            Ok(Some(ProcessMessage::Failed(e))) => {
                self.done = true;
                Err(EngineError::Stream(e))
            }
            Ok(Some(ProcessMessage::Exited(status))) => {
                self.done = true;
                match status {
                    Ok(status) if status.success() => Ok(Polled::Done),
                    Ok(status) => Err(EngineError::ExitStatus(status.to_string())),
                    Err(e) => Err(EngineError::Stream(e)),
                }
            }
        }
    }
}

/// Build the engine described by `config`.
///
/// `program` wins over `replay_file`; with neither the demo script is used.
pub fn engine_from_config(
    config: &EngineConfig,
    runtime: tokio::runtime::Handle,
) -> Result<Arc<dyn Engine>> {
    if let Some(program) = &config.program {
        tracing::info!("Using external engine: {}", program);
        return Ok(Arc::new(ProcessEngine::new(
            program.clone(),
            config.args.clone(),
            runtime,
        )));
    }

    if let Some(replay) = &config.replay_file {
        tracing::info!("Replaying recorded events from {}", replay);
        let engine = ScriptedEngine::from_jsonl_file(replay)?
            .with_delay(Duration::from_millis(config.replay_delay_ms));
        return Ok(Arc::new(engine));
    }

    tracing::warn!("No engine configured, using the built-in demo script");
    Ok(Arc::new(ScriptedEngine::demo()))
}
