//! Timestamp search over a ring store index.
//!
//! Everything here is stateless: each query reads the index as it is now,
//! since the producer keeps appending and evicting between calls.

use std::collections::VecDeque;

use super::ringbuf::{FrameRef, RingStore};

/// Position of the entry closest to `ts`.
///
/// Queries before the oldest entry resolve to the oldest, after the newest to
/// the newest. Between two entries the smaller absolute difference wins and a
/// tie goes to the earlier one. When several entries share the winning
/// timestamp the lowest position is returned.
pub fn nearest_index(index: &VecDeque<FrameRef>, ts: f64) -> Option<usize> {
    let len = index.len();
    if len == 0 {
        return None;
    }

    let upper = index.partition_point(|r| r.timestamp < ts);
    let pos = if upper == 0 {
        0
    } else if upper == len {
        len - 1
    } else {
        let (before, after) = (&index[upper - 1], &index[upper]);
        if ts - before.timestamp <= after.timestamp - ts {
            upper - 1
        } else {
            upper
        }
    };

    // first entry of an equal-timestamp run
    let winner = index[pos].timestamp;
    Some(index.partition_point(|r| r.timestamp < winner))
}

/// Nearest position moved by `delta`, clamped to the index bounds.
pub fn step_index(index: &VecDeque<FrameRef>, ts: f64, delta: i64) -> Option<usize> {
    let pos = nearest_index(index, ts)?;
    let last = index.len() as i64 - 1;
    Some((pos as i64).saturating_add(delta).clamp(0, last) as usize)
}

/// Live edge shared by both cameras: the older of the two newest frames.
pub fn combined_latest(a: &RingStore, b: &RingStore) -> Option<f64> {
    Some(a.latest_timestamp()?.min(b.latest_timestamp()?))
}

/// Earliest instant both cameras can serve: the newer of the two oldest frames.
pub fn combined_oldest(a: &RingStore, b: &RingStore) -> Option<f64> {
    Some(a.oldest_timestamp()?.max(b.oldest_timestamp()?))
}

/// Frame-accurate step across two independent cameras.
///
/// Forward steps land on the closest next frame of either camera, backward
/// steps on the closest previous one. `None` only when both stores are empty.
pub fn step_pair(a: &RingStore, b: &RingStore, ts: f64, delta: i64) -> Option<f64> {
    let candidates = [a.step(ts, delta), b.step(ts, delta)];
    let times = candidates.iter().flatten().map(|r| r.timestamp);
    if delta >= 0 {
        times.reduce(f64::min)
    } else {
        times.reduce(f64::max)
    }
}
