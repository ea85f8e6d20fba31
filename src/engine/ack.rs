//! Consumer-paced backpressure.
//!
//! The consumer writes one ASCII integer per line; `v` means segments up to
//! and including `v` are acknowledged and the producer may run
//! `lead_window` segments past it. A consumer that stops answering only
//! costs `failure_limit` reads before the gate opens for good.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::net::TcpStream;

pub const DEFAULT_FAILURE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckWindow {
    pub highest_acknowledged: u32,
    pub lead_window: u32,
}

impl AckWindow {
    pub fn new(initial_segment: u32, lead_window: u32) -> Self {
        Self {
            highest_acknowledged: initial_segment.saturating_add(lead_window),
            lead_window,
        }
    }

    pub fn acknowledge(&mut self, value: u32) {
        self.highest_acknowledged = value.saturating_add(self.lead_window);
    }

    pub fn would_block(&self, segment_index: u32) -> bool {
        segment_index >= self.highest_acknowledged
    }
}

pub struct AckGate {
    window: AckWindow,
    channel: Option<Box<dyn BufRead + Send>>,
    failure_limit: u32,
    consecutive_failures: u32,
    failed_open: bool,
}

impl AckGate {
    /// No ack channel; `wait_for` never blocks
    pub fn disabled() -> Self {
        Self {
            window: AckWindow::new(0, 0),
            channel: None,
            failure_limit: DEFAULT_FAILURE_LIMIT,
            consecutive_failures: 0,
            failed_open: false,
        }
    }

    pub fn new(
        reader: impl BufRead + Send + 'static,
        initial_segment: u32,
        lead_window: u32,
    ) -> Self {
        Self {
            window: AckWindow::new(initial_segment, lead_window),
            channel: Some(Box::new(reader)),
            failure_limit: DEFAULT_FAILURE_LIMIT,
            consecutive_failures: 0,
            failed_open: false,
        }
    }

    pub fn with_failure_limit(mut self, limit: u32) -> Self {
        self.failure_limit = limit.max(1);
        self
    }

    /// Open the point-to-point channel to the consumer
    pub fn connect(addr: &str, initial_segment: u32, lead_window: u32) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .with_context(|| format!("Failed to connect ack channel to {}", addr))?;
        tracing::info!(addr, initial_segment, lead_window, "ack channel connected");
        Ok(Self::new(BufReader::new(stream), initial_segment, lead_window))
    }

    pub fn window(&self) -> AckWindow {
        self.window
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    pub fn is_failed_open(&self) -> bool {
        self.failed_open
    }

    pub fn would_block(&self, segment_index: u32) -> bool {
        self.channel.is_some() && !self.failed_open && self.window.would_block(segment_index)
    }

    /// Block until `segment_index` is inside the lead window
    pub fn wait_for(&mut self, segment_index: u32) {
        while self.would_block(segment_index) {
            let Some(channel) = self.channel.as_mut() else {
                return;
            };

            let mut line = String::new();
            let outcome = match channel.read_line(&mut line) {
                Ok(0) => Err("channel closed".to_string()),
                Ok(_) => line
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| format!("unparseable ack {:?}", line.trim())),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(value) => {
                    self.consecutive_failures = 0;
                    self.window.acknowledge(value);
                    tracing::debug!(
                        ack = value,
                        highest = self.window.highest_acknowledged,
                        waiting_for = segment_index,
                        "segment acknowledged"
                    );
                }
                Err(reason) => {
                    self.consecutive_failures += 1;
                    tracing::debug!(failures = self.consecutive_failures, %reason, "ack read failed");
                    if self.consecutive_failures >= self.failure_limit {
                        tracing::warn!(
                            failures = self.consecutive_failures,
                            segment = segment_index,
                            "ack channel unresponsive, continuing without backpressure"
                        );
                        self.failed_open = true;
                        self.channel = None;
                    }
                }
            }
        }
    }
}
