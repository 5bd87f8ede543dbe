//! Supervision of transfer and clone child processes.
//!
//! Tool output is scanned line by line (both `\n` and `\r` terminate a
//! line, since download tools redraw progress in place). Known progress
//! formats update a live status bar; error lines are kept for the batch
//! summary whatever the verbosity.

use bytes::BytesMut;
use futures::StreamExt;
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use regex::Regex;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::OnceLock;
use tokio::process::Command;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUnit {
    Bytes,
    /// Objects, deltas or files (version-control progress).
    Items,
    /// Only a percentage is known; `done`/`total` are out of 100.
    Percent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub unit: ProgressUnit,
    pub connections: Option<u32>,
    /// Bytes per second.
    pub speed: Option<u64>,
    pub eta: Option<String>,
    pub phase: Option<String>,
}

impl ProgressEvent {
    fn percent(done: u64) -> Self {
        ProgressEvent {
            bytes_done: done.min(100),
            bytes_total: 100,
            unit: ProgressUnit::Percent,
            connections: None,
            speed: None,
            eta: None,
            phase: None,
        }
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(phase) = &self.phase {
            parts.push(phase.clone());
        }
        match self.unit {
            ProgressUnit::Bytes => parts.push(format!(
                "{}/{}",
                HumanBytes(self.bytes_done),
                HumanBytes(self.bytes_total)
            )),
            ProgressUnit::Items => parts.push(format!("{}/{}", self.bytes_done, self.bytes_total)),
            ProgressUnit::Percent => {}
        }
        if let Some(cn) = self.connections {
            parts.push(format!("CN:{}", cn));
        }
        if let Some(speed) = self.speed {
            parts.push(format!("{}/s", HumanBytes(speed)));
        }
        if let Some(eta) = &self.eta {
            parts.push(format!("ETA:{}", eta));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLine {
    pub code: Option<i32>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Progress(ProgressEvent),
    Error(ErrorLine),
    Info(String),
}

/// What a supervised process reported.
#[derive(Debug, Clone, Default)]
pub struct MonitorReport {
    pub last_progress: Option<ProgressEvent>,
    pub errors: Vec<ErrorLine>,
}

impl MonitorReport {
    pub fn error_codes(&self) -> Vec<i32> {
        self.errors.iter().filter_map(|e| e.code).collect()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| match e.code {
                Some(code) => format!("[{}] {}", code, e.message),
                None => e.message.clone(),
            })
            .collect()
    }

    fn record(&mut self, event: LineEvent) {
        match event {
            LineEvent::Progress(progress) => self.last_progress = Some(progress),
            LineEvent::Error(error) => self.errors.push(error),
            LineEvent::Info(_) => {}
        }
    }
}

struct Patterns {
    aria2: Regex,
    git: Regex,
    tqdm: Regex,
    curl_bar: Regex,
    aria2_error_code: Regex,
    curl_error: Regex,
    error_marker: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // [#2089b0 400KiB/33MiB(1%) CN:1 DL:115KiB ETA:4m46s]
        aria2: Regex::new(
            r"\[#[0-9a-fA-F]+\s+(?P<done>[\d.]+[KMGT]?i?B)/(?P<total>[\d.]+[KMGT]?i?B)(?:\(\d+%\))?(?:\s+CN:(?P<cn>\d+))?(?:\s+SD:\d+)?(?:\s+DL:(?P<speed>[\d.]+[KMGT]?i?B))?(?:\s+UL:\S+)?(?:\s+ETA:(?P<eta>[\dhms]+))?\]",
        )
        .unwrap(),
        // Receiving objects:  45% (450/1000), 1.20 MiB | 2.00 MiB/s
        git: Regex::new(
            r"(?P<phase>Counting objects|Compressing objects|Receiving objects|Resolving deltas|Updating files):\s+\d+%\s+\((?P<done>\d+)/(?P<total>\d+)\)(?:,\s+[\d.]+\s+\w+(?:\s+\|\s+(?P<speed>[\d.]+\s+[KMGT]?i?B)/s)?)?",
        )
        .unwrap(),
        // 45%|████      | 1.20G/2.60G [00:10<00:12, 110MB/s]
        tqdm: Regex::new(
            r"(?P<pct>\d+)%\|[^|]*\|\s*(?P<done>[\d.]+[kKMGT]?i?B?)/(?P<total>[\d.]+[kKMGT]?i?B?)\s*\[[^<\]]*<(?P<eta>[^,\]]+)(?:,\s*(?P<speed>[\d.]+[kKMGT]?i?B)/s)?",
        )
        .unwrap(),
        // ######################           31.4%
        curl_bar: Regex::new(r"^#+\s+(?P<pct>\d+(?:\.\d+)?)%$").unwrap(),
        aria2_error_code: Regex::new(r"errorCode=(?P<code>\d+)").unwrap(),
        curl_error: Regex::new(r"^curl: \((?P<code>\d+)\)\s*(?P<msg>.*)$").unwrap(),
        error_marker: Regex::new(
            r"(?i)(\[ERROR\]|errorCode=\d+|^(fatal|error):|^\w*(Error|Exception):|access denied|failed to retrieve|\(ERR\))",
        )
        .unwrap(),
    })
}

/// Parses sizes such as `400KiB`, `1.2 GiB`, `110MB` or `1.20G`. Binary
/// units (`KiB`) use 1024, decimal ones 1000.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    let unit = unit.trim();
    let base: f64 = if unit.contains('i') { 1024.0 } else { 1000.0 };
    let exponent = match unit.chars().next().map(|c| c.to_ascii_uppercase()) {
        None | Some('B') => 0,
        Some('K') => 1,
        Some('M') => 2,
        Some('G') => 3,
        Some('T') => 4,
        _ => return None,
    };
    Some((value * base.powi(exponent)).round() as u64)
}

pub fn parse_line(line: &str) -> LineEvent {
    let line = line.trim();
    let p = patterns();

    if let Some(caps) = p.curl_error.captures(line) {
        return LineEvent::Error(ErrorLine {
            code: caps["code"].parse().ok(),
            message: caps["msg"].trim().to_string(),
        });
    }
    if p.error_marker.is_match(line) {
        let code = p
            .aria2_error_code
            .captures(line)
            .and_then(|c| c["code"].parse().ok());
        return LineEvent::Error(ErrorLine {
            code,
            message: line.to_string(),
        });
    }

    if let Some(caps) = p.aria2.captures(line) {
        if let (Some(done), Some(total)) = (parse_size(&caps["done"]), parse_size(&caps["total"])) {
            return LineEvent::Progress(ProgressEvent {
                bytes_done: done,
                bytes_total: total,
                unit: ProgressUnit::Bytes,
                connections: caps.name("cn").and_then(|m| m.as_str().parse().ok()),
                speed: caps.name("speed").and_then(|m| parse_size(m.as_str())),
                eta: caps.name("eta").map(|m| m.as_str().to_string()),
                phase: None,
            });
        }
    }
    if let Some(caps) = p.git.captures(line) {
        return LineEvent::Progress(ProgressEvent {
            bytes_done: caps["done"].parse().unwrap_or(0),
            bytes_total: caps["total"].parse().unwrap_or(0),
            unit: ProgressUnit::Items,
            connections: None,
            speed: caps.name("speed").and_then(|m| parse_size(m.as_str())),
            eta: None,
            phase: Some(caps["phase"].to_string()),
        });
    }
    if let Some(caps) = p.tqdm.captures(line) {
        if let (Some(done), Some(total)) = (parse_size(&caps["done"]), parse_size(&caps["total"])) {
            return LineEvent::Progress(ProgressEvent {
                bytes_done: done,
                bytes_total: total,
                unit: ProgressUnit::Bytes,
                connections: None,
                speed: caps.name("speed").and_then(|m| parse_size(m.as_str())),
                eta: caps.name("eta").map(|m| m.as_str().trim().to_string()),
                phase: None,
            });
        }
        let pct: u64 = caps["pct"].parse().unwrap_or(0);
        return LineEvent::Progress(ProgressEvent::percent(pct));
    }
    if let Some(caps) = p.curl_bar.captures(line) {
        let pct: f64 = caps["pct"].parse().unwrap_or(0.0);
        return LineEvent::Progress(ProgressEvent::percent(pct as u64));
    }

    LineEvent::Info(line.to_string())
}

/// Splits a byte stream on `\n` or `\r`, dropping empty lines.
#[derive(Debug, Default)]
pub struct ProgressLineCodec;

impl Decoder for ProgressLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        while let Some(pos) = src.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let chunk = src.split_to(pos + 1);
            let line = String::from_utf8_lossy(&chunk[..pos]).trim().to_string();
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let chunk = src.split_to(src.len());
        let line = String::from_utf8_lossy(&chunk).trim().to_string();
        Ok(if line.is_empty() { None } else { Some(line) })
    }
}

/// Live single-line status for one transfer. Hidden in silent mode.
#[derive(Clone)]
pub struct ProgressDisplay {
    bar: ProgressBar,
    verbose: bool,
}

impl ProgressDisplay {
    pub fn new(multi: &MultiProgress, label: &str, verbose: bool) -> Self {
        let bar = if verbose {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] {prefix:.bold} [{bar:30.cyan/blue}] {percent:>3}% {wide_msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        bar.set_prefix(label.to_string());
        Self { bar, verbose }
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            verbose: false,
        }
    }

    fn update(&self, event: &LineEvent) {
        match event {
            LineEvent::Progress(progress) => {
                if progress.bytes_total > 0 {
                    self.bar.set_length(progress.bytes_total);
                    self.bar.set_position(progress.bytes_done.min(progress.bytes_total));
                }
                self.bar.set_message(progress.summary());
            }
            LineEvent::Error(error) => {
                if self.verbose {
                    self.bar.println(format!("  \x1b[1;31m✗ {}\x1b[0m", error.message));
                }
            }
            LineEvent::Info(_) => {}
        }
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }

    pub fn abandon(&self, message: impl Into<String>) {
        self.bar.abandon_with_message(message.into());
    }
}

/// Runs `command` to completion, feeding its output through [`parse_line`].
///
/// A non-zero exit becomes [`FetchError::Process`] carrying the last error
/// line the tool printed. Cancelling `cancel` kills the child and yields
/// [`FetchError::Cancelled`].
pub async fn supervise(
    mut command: Command,
    display: &ProgressDisplay,
    cancel: &CancellationToken,
) -> Result<MonitorReport, FetchError> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }

    let mut child = command.spawn().map_err(|e| FetchError::Process {
        program: program.clone(),
        code: None,
        message: format!("failed to start: {}", e),
    })?;

    let stdout = child.stdout.take().map(|s| FramedRead::new(s, ProgressLineCodec));
    let stderr = child.stderr.take().map(|s| FramedRead::new(s, ProgressLineCodec));
    let mut lines = match (stdout, stderr) {
        (Some(out), Some(err)) => futures::stream::select(out, err).boxed(),
        (Some(out), None) => out.boxed(),
        (None, Some(err)) => err.boxed(),
        (None, None) => futures::stream::empty::<io::Result<String>>().boxed(),
    };

    let mut report = MonitorReport::default();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(FetchError::Cancelled);
            }
            next = lines.next() => match next {
                Some(Ok(line)) => {
                    let event = parse_line(&line);
                    if let LineEvent::Error(error) = &event {
                        tracing::debug!(program = %program, code = ?error.code, "{}", error.message);
                    }
                    display.update(&event);
                    report.record(event);
                }
                Some(Err(e)) => {
                    tracing::debug!(program = %program, error = %e, "unreadable output");
                }
                None => break,
            }
        }
    }

    let status: ExitStatus = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(FetchError::Cancelled);
        }
        status = child.wait() => status?,
    };

    if status.success() {
        Ok(report)
    } else {
        let message = report
            .error_messages()
            .pop()
            .unwrap_or_else(|| format!("exited with {}", status));
        Err(FetchError::Process {
            program,
            code: status.code(),
            message,
        })
    }
}
