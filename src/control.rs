//! Textual control commands and how they act on a session.

use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use crate::export::ViewMode;
use crate::playback::Playhead;
use crate::session::{Moment, ReplaySession};
use crate::utils::format_hms;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Toggle,
    View(ViewMode),
    /// Frame step, negative for backwards
    Step(i64),
    Speed(f64),
    Reverse,
    Forward,
    /// Back to `jump_back` seconds behind live
    Live,
    /// Seconds from the start of the retention window
    Seek(f64),
    Export,
    Cameras(u32, u32),
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| Error::Command("empty line".into()))?
            .to_ascii_lowercase();
        let args: Vec<&str> = words.collect();
        let bad = || Error::Command(line.trim().to_string());

        let cmd = match (verb.as_str(), args.as_slice()) {
            ("play", []) => Command::Play,
            ("pause", []) => Command::Pause,
            ("toggle" | "space", []) => Command::Toggle,
            ("view", [mode]) => Command::View(match *mode {
                "1" => ViewMode::Camera1,
                "2" => ViewMode::Camera2,
                "3" => ViewMode::SideBySide,
                _ => return Err(bad()),
            }),
            ("step", []) => Command::Step(1),
            ("step", [n]) => Command::Step(n.parse().map_err(|_| bad())?),
            ("speed", [x]) => Command::Speed(x.trim_end_matches('x').parse().map_err(|_| bad())?),
            ("reverse", []) => Command::Reverse,
            ("forward", []) => Command::Forward,
            ("live", []) => Command::Live,
            ("seek", [secs]) => Command::Seek(secs.parse().map_err(|_| bad())?),
            ("export", []) => Command::Export,
            ("cams", [a, b]) => Command::Cameras(
                a.parse().map_err(|_| bad())?,
                b.parse().map_err(|_| bad())?,
            ),
            ("status", []) => Command::Status,
            ("quit" | "exit", []) => Command::Quit,
            _ => return Err(bad()),
        };
        Ok(cmd)
    }
}

/// What the caller should do after a command ran.
pub enum Outcome {
    /// Status line for the operator
    Done(String),
    /// Clips are being written in the background
    Exporting(Moment),
    Quit,
}

/// Apply `cmd` to the session and playhead.
///
/// Camera swaps block while the old writers stop.
pub fn apply(cmd: Command, session: &mut ReplaySession, playhead: &Mutex<Playhead>) -> Result<Outcome> {
    let live = session.stores().live_edge();
    let mut head = playhead.lock().unwrap_or_else(PoisonError::into_inner);

    let msg = match cmd {
        Command::Play => {
            head.play();
            "playing".to_string()
        }
        Command::Pause => {
            head.pause();
            "paused".to_string()
        }
        Command::Toggle => {
            head.toggle_pause();
            let state = if head.is_paused() { "paused" } else { "playing" };
            state.to_string()
        }
        Command::View(mode) => {
            head.set_view(mode);
            format!("view {}", mode.tag())
        }
        Command::Step(delta) => match head.step(&session.stores(), delta) {
            Some(ts) => format!("at {:.3}", ts),
            None => "nothing to step to".to_string(),
        },
        Command::Speed(speed) => {
            head.set_speed(speed)?;
            format!("{}x", speed)
        }
        Command::Reverse => {
            head.reverse();
            "reverse".to_string()
        }
        Command::Forward => {
            head.forward();
            "forward".to_string()
        }
        Command::Live => {
            head.jump_live(live);
            "live".to_string()
        }
        Command::Seek(offset) => {
            head.seek(live, offset);
            match live {
                Some(live) => head.label(live),
                None => "no footage yet".to_string(),
            }
        }
        Command::Export => {
            let (_, end) = head.export_window(
                live,
                session.config().export.clip_secs,
                session.config().playback.fps,
            )?;
            drop(head);
            return Ok(Outcome::Exporting(session.export_moment(end)?));
        }
        Command::Cameras(a, b) => {
            drop(head);
            session.swap_cameras(a, b)?;
            playhead
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .reset();
            return Ok(Outcome::Done(format!("cameras A={} B={}", a, b)));
        }
        Command::Status => {
            let status = session.status();
            let position = match (live, head.position()) {
                (Some(live), Some(_)) => head.label(live),
                _ => "--:--:--".to_string(),
            };
            format!(
                "cameras A={} B={} | {} | {} | {}x {:?} | frames {}/{} evicted {}/{} dropped {}/{} | buffered {}",
                status.cameras[0],
                status.cameras[1],
                position,
                if head.is_paused() { "paused" } else { "playing" },
                head.speed(),
                head.direction(),
                status.stats[0].len,
                status.stats[1].len,
                status.stats[0].frames_evicted,
                status.stats[1].frames_evicted,
                status.stats[0].frames_dropped,
                status.stats[1].frames_dropped,
                match (status.live, status.oldest) {
                    (Some(live), Some(oldest)) => format_hms(live - oldest),
                    _ => format_hms(0.0),
                }
            )
        }
        Command::Quit => return Ok(Outcome::Quit),
    };
    Ok(Outcome::Done(msg))
}
