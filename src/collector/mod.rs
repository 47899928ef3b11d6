//! Metric sources
//!
//! The collector is an external tracing command whose stdout is the metric
//! payload. It is treated as opaque text; parsing happens on the display side.

use std::future::Future;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::protocol::MetricKind;

const SCHEDULE_PROGRAM: &str =
    "kprobe:schedule { @[comm] = count(); } interval:s:1 { print(@); clear(@); exit(); }";

/// Produces one text blob per sampling interval
pub trait MetricSource: Send + Sync + 'static {
    fn kind(&self) -> MetricKind;

    fn sample(&self) -> impl Future<Output = AppResult<String>> + Send;
}

/// Runs a command and returns its stdout
#[derive(Debug, Clone)]
pub struct CommandSource {
    kind: MetricKind,
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    pub fn new(kind: MetricKind, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            args,
        }
    }

    /// Built-in collector for `kind`
    pub fn for_kind(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Cpu => Self::new(
                kind,
                "sudo",
                vec![
                    "bpftrace".to_string(),
                    "-e".to_string(),
                    SCHEDULE_PROGRAM.to_string(),
                ],
            ),
        }
    }

    /// Operator supplied shell command
    pub fn shell(kind: MetricKind, command: &str) -> Self {
        Self::new(kind, "sh", vec!["-c".to_string(), command.to_string()])
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl MetricSource for CommandSource {
    fn kind(&self) -> MetricKind {
        self.kind
    }

    async fn sample(&self) -> AppResult<String> {
        debug!(program = %self.program, kind = %self.kind, "Collecting metrics");

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::collector(&format!("failed to exec {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            if !stderr.is_empty() {
                warn!(program = %self.program, stderr = %stderr.trim(), "Collector wrote to stderr");
            }
            Ok(stdout.into_owned())
        } else {
            Err(AppError::collector(&format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}
