//! Energy-based voice activity detection.
//!
//! [`SilenceDetector`] is the pure decision rule; [`VadMonitor`] runs it on a
//! fixed polling interval against the latest input level, alongside an
//! independent wall-clock hard cap. Whichever fires first stops the
//! recording.

use assess_types::VadSettings;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Root-mean-square energy of a block of normalized samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Why a recording was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Energy stayed below the threshold for longer than the silence window.
    Silence,
    /// The turn ran past its hard cap.
    HardCap,
}

/// The single stop decision for a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadStop {
    pub reason: StopReason,
    /// Time from the start of recording to the start of the final silence.
    pub speech: Duration,
    /// Time from the start of recording to the decision.
    pub elapsed: Duration,
}

/// Adaptive silence timeout plus hard cap.
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    threshold: f32,
    silence: Duration,
    hard_cap: Duration,
    silence_start: Option<Duration>,
    fired: bool,
}

impl SilenceDetector {
    pub fn new(settings: &VadSettings, hard_cap: Duration) -> Self {
        Self {
            threshold: settings.rms_threshold,
            silence: settings.silence(),
            hard_cap,
            silence_start: None,
            fired: false,
        }
    }

    /// Feeds one level sample taken `elapsed` after recording started.
    ///
    /// Returns the stop decision at most once; later calls return `None`.
    pub fn observe(&mut self, level: f32, elapsed: Duration) -> Option<VadStop> {
        if self.fired {
            return None;
        }

        if elapsed > self.hard_cap {
            return self.fire(StopReason::HardCap, elapsed);
        }

        if level < self.threshold {
            match self.silence_start {
                None => self.silence_start = Some(elapsed),
                Some(start) if elapsed.saturating_sub(start) > self.silence => {
                    return self.fire(StopReason::Silence, elapsed);
                }
                Some(_) => {}
            }
        } else {
            self.silence_start = None;
        }
        None
    }

    /// Marks the hard cap as reached by the wall-clock timer.
    pub fn hard_cap_reached(&mut self, elapsed: Duration) -> Option<VadStop> {
        if self.fired {
            return None;
        }
        self.fire(StopReason::HardCap, elapsed)
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    fn fire(&mut self, reason: StopReason, elapsed: Duration) -> Option<VadStop> {
        self.fired = true;
        let speech = match reason {
            StopReason::Silence => self.silence_start.unwrap_or(elapsed),
            StopReason::HardCap => elapsed,
        };
        Some(VadStop {
            reason,
            speech,
            elapsed,
        })
    }
}

/// The polling loop for one listening phase.
///
/// Dropping the monitor cancels the loop and the hard-cap timer.
#[derive(Debug)]
pub struct VadMonitor {
    stop_rx: Option<oneshot::Receiver<VadStop>>,
    polls: Arc<AtomicU64>,
    _guard: DropGuard,
}

impl VadMonitor {
    /// Starts sampling `level_rx` every `settings.poll_interval_ms`.
    pub fn spawn(
        mut level_rx: watch::Receiver<f32>,
        settings: &VadSettings,
        hard_cap: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (stop_tx, stop_rx) = oneshot::channel();
        let polls = Arc::new(AtomicU64::new(0));
        let poll_count = Arc::clone(&polls);
        let mut detector = SilenceDetector::new(settings, hard_cap);
        let poll_interval = settings.poll_interval();

        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let hard_cap_timer = tokio::time::sleep(hard_cap);
            tokio::pin!(hard_cap_timer);

            let stop = loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!("vad monitor cancelled");
                        return;
                    }
                    _ = &mut hard_cap_timer => {
                        if let Some(stop) = detector.hard_cap_reached(started.elapsed()) {
                            break stop;
                        }
                    }
                    _ = ticker.tick() => {
                        poll_count.fetch_add(1, Ordering::Relaxed);
                        let level = *level_rx.borrow_and_update();
                        if let Some(stop) = detector.observe(level, started.elapsed()) {
                            break stop;
                        }
                    }
                }
            };

            tracing::debug!(reason = ?stop.reason, elapsed_ms = stop.elapsed.as_millis() as u64, "vad stop");
            let _ = stop_tx.send(stop);
        });

        Self {
            stop_rx: Some(stop_rx),
            polls,
            _guard: cancel.drop_guard(),
        }
    }

    /// Resolves with the stop decision. Resolves once; later calls, or a
    /// cancelled loop, yield `None`.
    pub async fn stopped(&mut self) -> Option<VadStop> {
        let rx = self.stop_rx.take()?;
        rx.await.ok()
    }

    /// Number of level samples taken so far.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// A handle to the poll counter that outlives the monitor.
    pub fn poll_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.polls)
    }
}
