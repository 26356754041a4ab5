//! Pairs frames with actions by nearest timestamp.
//!
//! Frames arrive at whatever rate the simulator manages while actions are
//! sampled on a fixed 50 ms grid, so the two sequences are never assumed to
//! line up one to one. Each frame is matched with the action whose timestamp
//! is closest; on a tie the earlier action wins.

use crate::action_log::ActionRecord;

/// For each frame timestamp, the index of the nearest action, or `None` if
/// there are no actions. Both inputs must be sorted ascending.
pub fn align_frames(frame_times: &[f64], actions: &[ActionRecord]) -> Vec<Option<usize>> {
    frame_times
        .iter()
        .map(|&t| nearest(t, actions))
        .collect()
}

fn nearest(t: f64, actions: &[ActionRecord]) -> Option<usize> {
    if actions.is_empty() {
        return None;
    }
    // first action at or after t
    let after = actions.partition_point(|a| a.timestamp < t);
    if after == 0 {
        return Some(0);
    }
    if after == actions.len() {
        return Some(actions.len() - 1);
    }
    let before = after - 1;
    if t - actions[before].timestamp <= actions[after].timestamp - t {
        Some(before)
    } else {
        Some(after)
    }
}

/// The largest distance, in seconds, between a frame and the action it was
/// matched with. Zero when either side is empty.
pub fn worst_gap(frame_times: &[f64], actions: &[ActionRecord]) -> f64 {
    frame_times
        .iter()
        .zip(align_frames(frame_times, actions))
        .filter_map(|(&t, idx)| idx.map(|i| (t - actions[i].timestamp).abs()))
        .fold(0.0, f64::max)
}
