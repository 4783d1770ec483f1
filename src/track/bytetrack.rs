use std::cmp::Ordering;

use super::TrackerConfig;
use crate::detect::{BBox, Detection};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrackState {
    /// Opened after the first frame, not yet seen twice.
    Tentative,
    Tracked,
    Lost,
}

#[derive(Clone, Debug)]
struct Track {
    id: u32,
    class_id: u32,
    /// Current (predicted or observed) box.
    bbox: BBox,
    /// Last box actually matched to a detection.
    observed: BBox,
    /// Displacement per frame.
    velocity: (f32, f32),
    state: TrackState,
    frames_lost: u32,
}

impl Track {
    fn new(id: u32, detection: &Detection, state: TrackState) -> Self {
        Self {
            id,
            class_id: detection.class_id,
            bbox: detection.bbox,
            observed: detection.bbox,
            velocity: (0.0, 0.0),
            state,
            frames_lost: 0,
        }
    }

    fn predict(&mut self) {
        self.bbox = self.bbox.translated(self.velocity.0, self.velocity.1);
    }

    fn observe(&mut self, bbox: BBox, smoothing: f32) {
        let elapsed = (self.frames_lost + 1) as f32;
        let (ox, oy) = self.observed.center();
        let (nx, ny) = bbox.center();
        let step = ((nx - ox) / elapsed, (ny - oy) / elapsed);
        self.velocity = (
            smoothing * step.0 + (1.0 - smoothing) * self.velocity.0,
            smoothing * step.1 + (1.0 - smoothing) * self.velocity.1,
        );
        self.bbox = bbox;
        self.observed = bbox;
        self.frames_lost = 0;
        self.state = TrackState::Tracked;
    }
}

/// ByteTrack-style tracker.
///
/// Association per frame:
/// 1. every track moves by its velocity
/// 2. high-score detections match confirmed tracks (tracked or lost) by IoU
/// 3. low-score detections rescue tracked tracks left over from step 2
/// 4. leftover high-score detections confirm tentative tracks
/// 5. unmatched tracks age and are dropped after the track buffer; an
///    unmatched tentative track is dropped at once
/// 6. leftover high-score detections open new tracks, confirmed on the
///    first frame and tentative afterwards
///
/// Matches never cross classes. Identifiers are never reused.
pub struct Tracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u32,
    frame_index: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            frame_index: 0,
        }
    }

    /// Tracks currently followed (tracked or lost), excluding tentative ones.
    pub fn active_tracks(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.state != TrackState::Tentative)
            .count()
    }

    /// Identifiers handed out so far.
    pub fn total_ids(&self) -> u32 {
        self.next_id - 1
    }

    /// Associate one frame of detections. Returns the detections that belong
    /// to a confirmed track, in input order, with `track_id` set.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<Detection> {
        self.frame_index += 1;
        for track in &mut self.tracks {
            track.predict();
        }

        let mut high = Vec::new();
        let mut low = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            if det.confidence >= self.config.high_score {
                high.push(idx);
            } else if det.confidence >= self.config.low_score {
                low.push(idx);
            }
        }

        let mut assigned: Vec<(usize, u32)> = Vec::new();
        let mut det_used = vec![false; detections.len()];
        let mut track_used = vec![false; self.tracks.len()];

        // First association: high-score detections against confirmed tracks.
        let confirmed: Vec<usize> = self.track_indices(|t| t.state != TrackState::Tentative);
        let first = self.associate(detections, &high, &confirmed, self.config.high_match_iou);
        let mut shifts = Vec::with_capacity(first.len());
        for &(det_idx, track_idx) in &first {
            let (px, py) = self.tracks[track_idx].bbox.center();
            let (dx, dy) = detections[det_idx].bbox.center();
            shifts.push((dx - px, dy - py));
            self.apply_match(detections, det_idx, track_idx, &mut det_used, &mut track_used);
            assigned.push((det_idx, self.tracks[track_idx].id));
        }

        if self.config.motion_compensation {
            if let Some((mx, my)) = median_shift(&mut shifts) {
                for (idx, track) in self.tracks.iter_mut().enumerate() {
                    if !track_used[idx] && track.state != TrackState::Tentative {
                        track.bbox = track.bbox.translated(mx, my);
                    }
                }
            }
        }

        // Second association: low-score detections rescue tracked tracks.
        let remaining_tracked: Vec<usize> =
            self.track_indices(|t| t.state == TrackState::Tracked);
        let remaining_tracked: Vec<usize> = remaining_tracked
            .into_iter()
            .filter(|&idx| !track_used[idx])
            .collect();
        let second = self.associate(detections, &low, &remaining_tracked, self.config.low_match_iou);
        for &(det_idx, track_idx) in &second {
            self.apply_match(detections, det_idx, track_idx, &mut det_used, &mut track_used);
            assigned.push((det_idx, self.tracks[track_idx].id));
        }

        // Third association: leftover high-score detections confirm tentative tracks.
        let leftover_high: Vec<usize> = high.iter().copied().filter(|&i| !det_used[i]).collect();
        let tentative: Vec<usize> = self.track_indices(|t| t.state == TrackState::Tentative);
        let third = self.associate(
            detections,
            &leftover_high,
            &tentative,
            self.config.tentative_match_iou,
        );
        for &(det_idx, track_idx) in &third {
            self.apply_match(detections, det_idx, track_idx, &mut det_used, &mut track_used);
            assigned.push((det_idx, self.tracks[track_idx].id));
        }

        // Age unmatched tracks; tentative tracks get one chance only.
        let buffer = self.config.track_buffer;
        let mut idx = 0;
        self.tracks.retain_mut(|track| {
            let used = track_used[idx];
            idx += 1;
            if used {
                return true;
            }
            match track.state {
                TrackState::Tentative => false,
                TrackState::Tracked | TrackState::Lost => {
                    track.state = TrackState::Lost;
                    track.frames_lost += 1;
                    track.frames_lost <= buffer
                }
            }
        });

        // New tracks from whatever high-score detections are still free.
        let first_frame = self.frame_index == 1;
        for &det_idx in &high {
            if det_used[det_idx] || detections[det_idx].confidence < self.config.new_track_score {
                continue;
            }
            let state = if first_frame {
                TrackState::Tracked
            } else {
                TrackState::Tentative
            };
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track::new(id, &detections[det_idx], state));
            if first_frame {
                assigned.push((det_idx, id));
            }
        }

        assigned.sort_by_key(|&(det_idx, _)| det_idx);
        assigned
            .into_iter()
            .map(|(det_idx, id)| Detection {
                track_id: Some(id),
                ..detections[det_idx].clone()
            })
            .collect()
    }

    fn track_indices(&self, keep: impl Fn(&Track) -> bool) -> Vec<usize> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| keep(t))
            .map(|(idx, _)| idx)
            .collect()
    }

    fn apply_match(
        &mut self,
        detections: &[Detection],
        det_idx: usize,
        track_idx: usize,
        det_used: &mut [bool],
        track_used: &mut [bool],
    ) {
        let smoothing = self.config.velocity_smoothing;
        self.tracks[track_idx].observe(detections[det_idx].bbox, smoothing);
        det_used[det_idx] = true;
        track_used[track_idx] = true;
    }

    /// Greedy IoU assignment, best pairs first.
    fn associate(
        &self,
        detections: &[Detection],
        det_indices: &[usize],
        track_indices: &[usize],
        min_iou: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for &det_idx in det_indices {
            let det = &detections[det_idx];
            for &track_idx in track_indices {
                let track = &self.tracks[track_idx];
                if track.class_id != det.class_id {
                    continue;
                }
                let iou = det.bbox.iou(&track.bbox);
                if iou >= min_iou && iou > 0.0 {
                    pairs.push((iou, det_idx, track_idx));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let mut used_det = Vec::new();
        let mut used_track = Vec::new();
        let mut matches = Vec::new();
        for (_, det_idx, track_idx) in pairs {
            if used_det.contains(&det_idx) || used_track.contains(&track_idx) {
                continue;
            }
            used_det.push(det_idx);
            used_track.push(track_idx);
            matches.push((det_idx, track_idx));
        }
        matches
    }
}

fn median_shift(shifts: &mut [(f32, f32)]) -> Option<(f32, f32)> {
    if shifts.is_empty() {
        return None;
    }
    let mid = shifts.len() / 2;
    shifts.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mx = shifts[mid].0;
    shifts.sort_by(|a, b| a.1.total_cmp(&b.1));
    let my = shifts[mid].1;
    Some((mx, my))
}
