//! Worker output scanning.
//!
//! Workers write a plain-text protocol on stdout and free-form diagnostics on
//! stderr. Output arrives in arbitrary chunks, so each stream gets a
//! [`LineBuffer`] that keeps the partial trailing line between chunks; the
//! matchers only ever see complete lines.
//!
//! stdout lines are checked against three independent patterns (a line may
//! hit more than one):
//! - the startup marker `Process Started Successfully`
//! - plate markers `LP-//<PLATE>//-LP`, any number per line
//! - the performance report line
//!
//! stderr lines are either warnings (ignored) or errors, classified by the
//! first matching rule in [`ERROR_RULES`].

use std::sync::OnceLock;

use plategate_core::{PerformanceSample, WorkerErrorKind};
use regex::Regex;

pub const STARTUP_MARKER: &str = "Process Started Successfully";

/// Substrings that mark a stderr line as noise rather than failure.
pub const WARNING_PATTERNS: &[&str] = &[
    "DeprecationWarning",
    "WARNING",
    "Note:",
    "Using CPU",
    "deprecated",
    "replaced by",
    "RuntimeWarning",
    "UserWarning",
    "FutureWarning",
];

/// Ordered classification rules; first match wins, no match is `OtherError`.
pub const ERROR_RULES: &[(&str, WorkerErrorKind)] = &[
    ("Stream timeout", WorkerErrorKind::ConnectionTimeout),
    ("unreachable", WorkerErrorKind::NetworkUnreachable),
    ("401", WorkerErrorKind::CredentialsUnauthorized),
];

fn plate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"LP-//(.+?)//-LP").expect("valid plate regex"))
}

fn performance_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"Performance Report: Avg FPS: ([\d.]+), CPU Usage: ([\d.]+)%, RAM Usage: ([\d.]+)%, GPU Usage: ([\d.]+)%, GPU Memory Usage: ([\d.]+)%",
        )
        .expect("valid performance regex")
    })
}

// ---------------------------------------------------------------------------
// Line buffering
// ---------------------------------------------------------------------------

/// Splits a byte stream into lines across arbitrary chunk boundaries.
///
/// Bytes are buffered until `\n`, so a UTF-8 sequence split between two
/// chunks decodes correctly. `\r\n` endings are trimmed.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(decode_line(&self.partial));
                self.partial.clear();
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }

    /// Flush the unterminated tail at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = decode_line(&self.partial);
        self.partial.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    line.strip_suffix('\r').unwrap_or(&line).to_string()
}

// ---------------------------------------------------------------------------
// stdout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StdoutEvent {
    /// Startup marker seen; reported at most once per scanner.
    Started,
    /// A candidate plate, trimmed, as the worker read it.
    Plate(String),
    Performance(PerformanceSample),
}

/// Stateful scanner for one worker's stdout.
#[derive(Debug, Default)]
pub struct StdoutScanner {
    lines: LineBuffer,
    started: bool,
}

impl StdoutScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StdoutEvent> {
        let mut events = Vec::new();
        for line in self.lines.push(chunk) {
            self.scan_line(&line, &mut events);
        }
        events
    }

    pub fn finish(&mut self) -> Vec<StdoutEvent> {
        let mut events = Vec::new();
        if let Some(line) = self.lines.finish() {
            self.scan_line(&line, &mut events);
        }
        events
    }

    fn scan_line(&mut self, line: &str, events: &mut Vec<StdoutEvent>) {
        if !self.started && line.contains(STARTUP_MARKER) {
            self.started = true;
            events.push(StdoutEvent::Started);
        }

        events.extend(extract_plates(line).into_iter().map(StdoutEvent::Plate));

        if let Some(sample) = parse_performance(line) {
            events.push(StdoutEvent::Performance(sample));
        }
    }
}

/// Every `LP-//…//-LP` payload on the line, trimmed; blank payloads are dropped.
pub fn extract_plates(line: &str) -> Vec<String> {
    plate_regex()
        .captures_iter(line)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|plate| !plate.is_empty())
        .collect()
}

pub fn parse_performance(line: &str) -> Option<PerformanceSample> {
    let caps = performance_regex().captures(line)?;
    let field = |idx: usize| -> Option<f64> { caps.get(idx)?.as_str().parse().ok() };
    Some(PerformanceSample {
        avg_fps: field(1)?,
        cpu_usage: field(2)?,
        ram_usage: field(3)?,
        gpu_usage: field(4)?,
        gpu_memory_usage: field(5)?,
    })
}

// ---------------------------------------------------------------------------
// stderr
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrClass {
    Warning,
    Error(WorkerErrorKind),
}

pub fn is_warning(line: &str) -> bool {
    WARNING_PATTERNS.iter().any(|pattern| line.contains(pattern))
}

pub fn classify_error(line: &str) -> WorkerErrorKind {
    ERROR_RULES
        .iter()
        .find(|(needle, _)| line.contains(needle))
        .map(|(_, kind)| *kind)
        .unwrap_or(WorkerErrorKind::OtherError)
}

pub fn classify_stderr(line: &str) -> StderrClass {
    if is_warning(line) {
        StderrClass::Warning
    } else {
        StderrClass::Error(classify_error(line))
    }
}

/// Stateful scanner for one worker's stderr. Blank lines are skipped.
#[derive(Debug, Default)]
pub struct StderrScanner {
    lines: LineBuffer,
}

impl StderrScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<(String, StderrClass)> {
        self.lines
            .push(chunk)
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let class = classify_stderr(&line);
                (line, class)
            })
            .collect()
    }

    pub fn finish(&mut self) -> Option<(String, StderrClass)> {
        let line = self.lines.finish()?;
        if line.trim().is_empty() {
            return None;
        }
        let class = classify_stderr(&line);
        Some((line, class))
    }
}
