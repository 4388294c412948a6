//! Incremental command output with pluggable subscribers.
//!
//! A long-running command (the snapshot backup in particular) produces output
//! that should be visible while it runs. The runner pushes each line to a
//! `LineSink`; where the line ends up (console, log, UI) is up to the sink.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

pub trait LineSink: Send + Sync {
    fn line(&self, stream: Stream, line: &str);
}

/// Discards everything.
pub struct NullSink;

impl LineSink for NullSink {
    fn line(&self, _stream: Stream, _line: &str) {}
}

/// Logs each line through `tracing`, tagged with a label (usually the
/// directory being backed up).
pub struct TracingSink {
    label: String,
}

impl TracingSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl LineSink for TracingSink {
    fn line(&self, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => tracing::info!(dir = %self.label, "{line}"),
            Stream::Stderr => tracing::warn!(dir = %self.label, "{line}"),
        }
    }
}

/// Prints lines to the terminal as they arrive.
pub struct ConsoleSink;

impl LineSink for ConsoleSink {
    fn line(&self, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => println!("{line}"),
            Stream::Stderr => eprintln!("{line}"),
        }
    }
}

/// Keeps every line in memory.
#[derive(Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<(Stream, String)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(Stream, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn text(&self) -> String {
        self.lines()
            .into_iter()
            .map(|(_, l)| l)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl LineSink for CollectingSink {
    fn line(&self, stream: Stream, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((stream, line.to_string()));
        }
    }
}

/// Fans each line out to every subscriber, in order.
#[derive(Default)]
pub struct Tee<'a> {
    sinks: Vec<&'a dyn LineSink>,
}

impl<'a> Tee<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: &'a dyn LineSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl LineSink for Tee<'_> {
    fn line(&self, stream: Stream, line: &str) {
        for sink in &self.sinks {
            sink.line(stream, line);
        }
    }
}
