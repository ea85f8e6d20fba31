use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Consumer request to slow the packet loop down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottleHint {
    #[default]
    None,
    Delay(Duration),
}

impl ThrottleHint {
    pub fn delay(&self) -> Duration {
        match self {
            ThrottleHint::None => Duration::ZERO,
            ThrottleHint::Delay(d) => *d,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSample {
    pub progress_percent: f64,
    pub speed_multiple: f64,
    pub eta_seconds: Option<f64>,
    #[serde(skip)]
    pub throttle_hint: ThrottleHint,
}

/// Rate-limited progress sampling; never sleeps itself
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    total_secs: f64,
    interval: Duration,
    last_wall: Instant,
    last_pts_secs: f64,
    eta: Option<f64>,
    throttle_hint: ThrottleHint,
}

impl ProgressReporter {
    pub fn new(total_secs: f64, interval: Duration, started_at: Instant) -> Self {
        Self {
            total_secs,
            interval,
            last_wall: started_at,
            last_pts_secs: 0.0,
            eta: None,
            throttle_hint: ThrottleHint::None,
        }
    }

    pub fn set_throttle_hint(&mut self, hint: ThrottleHint) {
        self.throttle_hint = hint;
    }

    /// `None` until `interval` has passed since the previous sample
    pub fn sample(&mut self, now_pts_secs: f64, now: Instant) -> Option<ProgressSample> {
        let elapsed = now.saturating_duration_since(self.last_wall);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }

        let speed = (now_pts_secs - self.last_pts_secs).max(0.0) / elapsed.as_secs_f64();

        let percent = if self.total_secs > 0.0 {
            (now_pts_secs * 100.0 / self.total_secs).clamp(0.0, 100.0)
        } else {
            0.0
        };

        if speed > 0.0 && self.total_secs > 0.0 {
            let raw = (self.total_secs - now_pts_secs).max(0.0) / speed;
            self.eta = Some(match self.eta {
                Some(prev) => 0.5 * raw + 0.5 * prev,
                None => raw,
            });
        }

        self.last_wall = now;
        self.last_pts_secs = now_pts_secs;

        Some(ProgressSample {
            progress_percent: percent,
            speed_multiple: speed,
            eta_seconds: self.eta,
            throttle_hint: self.throttle_hint,
        })
    }
}

pub trait ProgressSink {
    /// Deliver a sample; the reply may ask for a slowdown
    fn report(&mut self, sample: &ProgressSample) -> Result<ThrottleHint>;
}

/// Fallback sink when no consumer URL is configured
#[derive(Debug, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn report(&mut self, sample: &ProgressSample) -> Result<ThrottleHint> {
        tracing::info!(
            percent = %format_args!("{:.1}", sample.progress_percent),
            speed = %format_args!("{:.2}x", sample.speed_multiple),
            eta = ?sample.eta_seconds.map(|e| e.round() as u64),
            "progress"
        );
        Ok(ThrottleHint::None)
    }
}

#[derive(Debug, Deserialize)]
struct ThrottleDirective {
    #[serde(default)]
    throttle_ms: Option<u64>,
}

/// Interpret a progress response body. Empty or foreign bodies mean no throttle.
pub fn parse_throttle_directive(body: &str) -> ThrottleHint {
    let body = body.trim();
    if body.is_empty() {
        return ThrottleHint::None;
    }
    match serde_json::from_str::<ThrottleDirective>(body) {
        Ok(ThrottleDirective {
            throttle_ms: Some(ms),
        }) if ms > 0 => ThrottleHint::Delay(Duration::from_millis(ms)),
        _ => ThrottleHint::None,
    }
}

/// POSTs samples as JSON to the consumer
pub struct HttpProgressSink {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpProgressSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build progress HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl ProgressSink for HttpProgressSink {
    fn report(&mut self, sample: &ProgressSample) -> Result<ThrottleHint> {
        let response = self
            .client
            .post(&self.url)
            .json(sample)
            .send()
            .with_context(|| format!("Progress POST to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Progress endpoint {} returned {}", self.url, status);
        }

        let body = response
            .text()
            .with_context(|| format!("Failed to read progress reply from {}", self.url))?;
        Ok(parse_throttle_directive(&body))
    }
}
