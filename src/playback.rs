//! Headless playback state and the render tick that samples it.
//!
//! The playhead lives inside the retention window `[live - retention, live]`,
//! where `live` is the newest instant both cameras can serve. It only moves
//! on [`Playhead::advance`] and the explicit navigation calls below.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use image::RgbImage;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::export::{moment_window, ViewMode};
use crate::session::StorePair;
use crate::utils::format_hms;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Reverse => -1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Playhead {
    play_ts: Option<f64>,
    paused: bool,
    speed: f64,
    direction: Direction,
    view: ViewMode,
    last_tick: Option<Instant>,
    retention: f64,
    jump_back: f64,
    /// Pause state to restore when a scrub ends
    scrub_resume: Option<bool>,
}

impl Playhead {
    pub fn new(retention: f64, jump_back: f64) -> Self {
        Self {
            play_ts: None,
            paused: false,
            speed: 1.0,
            direction: Direction::Forward,
            view: ViewMode::SideBySide,
            last_tick: None,
            retention,
            jump_back,
            scrub_resume: None,
        }
    }

    pub fn position(&self) -> Option<f64> {
        self.play_ts
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    pub fn set_view(&mut self, view: ViewMode) {
        self.view = view;
    }

    fn window_start(&self, live: f64) -> f64 {
        live - self.retention
    }

    fn clamp(&self, ts: f64, live: f64) -> f64 {
        ts.min(live).max(self.window_start(live))
    }

    fn default_position(&self, live: f64) -> f64 {
        (live - self.jump_back).max(self.window_start(live))
    }

    /// Move the playhead by the wall time elapsed since the last tick.
    ///
    /// The first tick with footage available places it `jump_back` behind
    /// live. Returns `None` while either camera has nothing buffered.
    pub fn advance(&mut self, live: Option<f64>, now: Instant) -> Option<f64> {
        let live = live?;
        let ts = match (self.play_ts, self.last_tick) {
            (Some(ts), Some(last)) => {
                let dt = now.saturating_duration_since(last).as_secs_f64();
                if self.paused {
                    ts
                } else {
                    ts + dt * self.speed * self.direction.sign()
                }
            }
            (Some(ts), None) => ts,
            (None, _) => self.default_position(live),
        };
        let ts = self.clamp(ts, live);
        self.play_ts = Some(ts);
        self.last_tick = Some(now);
        Some(ts)
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn play(&mut self) {
        self.paused = false;
    }

    /// Playback rate multiplier; must be positive and finite.
    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(Error::InvalidConfig(format!("speed {} is not positive", speed)));
        }
        self.speed = speed;
        Ok(())
    }

    pub fn reverse(&mut self) {
        self.direction = Direction::Reverse;
        self.paused = false;
    }

    pub fn forward(&mut self) {
        self.direction = Direction::Forward;
        self.paused = false;
    }

    /// Jump to `jump_back` seconds behind live.
    pub fn jump_live(&mut self, live: Option<f64>) {
        if let Some(live) = live {
            self.play_ts = Some(self.default_position(live));
        }
    }

    /// Seek to `offset` seconds after the start of the retention window.
    pub fn seek(&mut self, live: Option<f64>, offset: f64) {
        if let (Some(live), true) = (live, offset.is_finite()) {
            self.play_ts = Some(self.clamp(self.window_start(live) + offset, live));
        }
    }

    /// Scrubbing holds playback paused until [`Playhead::end_scrub`].
    pub fn begin_scrub(&mut self) {
        if self.scrub_resume.is_none() {
            self.scrub_resume = Some(self.paused);
            self.paused = true;
        }
    }

    pub fn end_scrub(&mut self) {
        if let Some(paused) = self.scrub_resume.take() {
            self.paused = paused;
        }
    }

    /// Frame-accurate step across both cameras; pauses playback.
    pub fn step(&mut self, pair: &StorePair, delta: i64) -> Option<f64> {
        let ts = pair.step(self.play_ts?, delta)?;
        self.play_ts = Some(ts);
        self.paused = true;
        Some(ts)
    }

    /// Forget the position, e.g. after the cameras changed.
    pub fn reset(&mut self) {
        self.play_ts = None;
        self.last_tick = None;
    }

    /// Offset into the retention window in milliseconds, for a slider.
    pub fn position_ms(&self, live: f64) -> Option<u64> {
        let rel = self.play_ts? - self.window_start(live);
        let max = (self.retention * 1000.0).round();
        Some((rel * 1000.0).round().clamp(0.0, max) as u64)
    }

    /// `HH:MM:SS / HH:MM:SS` position within the retention window.
    pub fn label(&self, live: f64) -> String {
        let rel = self
            .play_ts
            .map(|ts| (ts - self.window_start(live)).clamp(0.0, self.retention))
            .unwrap_or(0.0);
        format!("{} / {}", format_hms(rel), format_hms(self.retention))
    }

    /// Export window ending at the playhead.
    pub fn export_window(&self, live: Option<f64>, clip_secs: f64, fps: u32) -> Result<(f64, f64)> {
        match (self.play_ts, live) {
            (Some(ts), Some(live)) => moment_window(ts, live, self.retention, clip_secs, fps),
            _ => Err(Error::InvalidWindow("not enough buffered footage".into())),
        }
    }
}

/// One render tick's worth of output.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub playhead: f64,
    pub live: f64,
    pub view: ViewMode,
    pub paused: bool,
    /// Decoded frame per camera; `None` draws a placeholder
    pub images: [Option<RgbImage>; 2],
    pub timestamps: [Option<f64>; 2],
    pub label: String,
}

/// Fixed-interval task resolving both stores at the playhead.
pub struct PlayheadSampler {
    task: JoinHandle<()>,
    frames: watch::Receiver<Option<Arc<RenderedFrame>>>,
}

impl PlayheadSampler {
    pub fn spawn(
        pair: Arc<ArcSwap<StorePair>>,
        playhead: Arc<Mutex<Playhead>>,
        fps: u32,
    ) -> Self {
        let (tx, frames) = watch::channel(None);
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Playhead sampler running every {:?}", period);

            loop {
                interval.tick().await;
                let stores = pair.load_full();
                let live = stores.live_edge();

                let (ts, view, paused, label) = {
                    let mut head = playhead.lock().unwrap_or_else(PoisonError::into_inner);
                    let Some(ts) = head.advance(live, Instant::now()) else {
                        if tx.send(None).is_err() {
                            break;
                        }
                        continue;
                    };
                    let label = live.map(|l| head.label(l)).unwrap_or_default();
                    (ts, head.view(), head.is_paused(), label)
                };
                let Some(live) = live else { continue };

                let rendered = tokio::task::spawn_blocking(move || {
                    sample(&stores, ts, live, view, paused, label)
                })
                .await;
                match rendered {
                    Ok(frame) => {
                        if tx.send(Some(Arc::new(frame))).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Render tick failed: {}", e),
                }
            }
            debug!("Playhead sampler stopped");
        });

        Self { task, frames }
    }

    /// Receiver for the most recent frame.
    pub fn frames(&self) -> watch::Receiver<Option<Arc<RenderedFrame>>> {
        self.frames.clone()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

fn sample(
    pair: &StorePair,
    playhead: f64,
    live: f64,
    view: ViewMode,
    paused: bool,
    label: String,
) -> RenderedFrame {
    let mut images = [None, None];
    let mut timestamps = [None, None];
    for (camera, store) in pair.stores.iter().enumerate() {
        // both cameras are located every tick, only visible ones are decoded
        if let Some(frame) = store.nearest(playhead) {
            timestamps[camera] = Some(frame.timestamp);
            if view.uses(camera) {
                images[camera] = store.load(&frame);
            }
        }
    }
    RenderedFrame {
        playhead,
        live,
        view,
        paused,
        images,
        timestamps,
        label,
    }
}
