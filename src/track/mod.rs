//! Multi-object tracking.
//!
//! Tracking gives detections of the same physical object a stable identifier
//! across consecutive frames. It is layered on top of stateless detector
//! backends, so any backend can be tracked.
//!
//! Two presets exist, named after the tracker configurations users pick from:
//! - `bytetrack`: two-stage IoU association (high-score, then low-score rescue)
//! - `botsort`: the same association plus global motion compensation between
//!   the two stages, for panning cameras

mod bytetrack;

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub use bytetrack::Tracker;

/// Supported tracker configurations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    #[default]
    ByteTrack,
    BotSort,
}

impl TrackerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerKind::ByteTrack => "bytetrack",
            TrackerKind::BotSort => "botsort",
        }
    }

    pub fn config(&self) -> TrackerConfig {
        match self {
            TrackerKind::ByteTrack => TrackerConfig::bytetrack(),
            TrackerKind::BotSort => TrackerConfig::botsort(),
        }
    }
}

impl FromStr for TrackerKind {
    type Err = anyhow::Error;

    /// Accepts the bare name or the `.yaml` configuration file name.
    fn from_str(value: &str) -> Result<Self> {
        let lowered = value.trim().to_ascii_lowercase();
        let name = lowered.strip_suffix(".yaml").unwrap_or(&lowered);
        match name {
            "bytetrack" => Ok(TrackerKind::ByteTrack),
            "botsort" => Ok(TrackerKind::BotSort),
            _ => Err(anyhow!(
                "unknown tracker '{}' (expected bytetrack or botsort)",
                value
            )),
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Association thresholds for one tracker preset.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Detections at or above this score take part in the first association.
    pub high_score: f32,
    /// Detections between `low_score` and `high_score` can only rescue
    /// existing tracks.
    pub low_score: f32,
    /// Unmatched detections at or above this score open a new track.
    pub new_track_score: f32,
    /// Minimum IoU for the first (high-score) association.
    pub high_match_iou: f32,
    /// Minimum IoU for the second (low-score) association.
    pub low_match_iou: f32,
    /// Minimum IoU for confirming a tentative track.
    pub tentative_match_iou: f32,
    /// Frames a lost track is kept before removal.
    pub track_buffer: u32,
    /// Weight of the newest displacement in the velocity estimate.
    pub velocity_smoothing: f32,
    /// Shift lost tracks by the median displacement of matched tracks
    /// before the second association.
    pub motion_compensation: bool,
}

impl TrackerConfig {
    pub fn bytetrack() -> Self {
        Self {
            high_score: 0.25,
            low_score: 0.1,
            new_track_score: 0.25,
            high_match_iou: 0.2,
            low_match_iou: 0.5,
            tentative_match_iou: 0.3,
            track_buffer: 30,
            velocity_smoothing: 0.5,
            motion_compensation: false,
        }
    }

    pub fn botsort() -> Self {
        Self {
            motion_compensation: true,
            ..Self::bytetrack()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_yaml_file_names() -> Result<()> {
        assert_eq!("bytetrack".parse::<TrackerKind>()?, TrackerKind::ByteTrack);
        assert_eq!("bytetrack.yaml".parse::<TrackerKind>()?, TrackerKind::ByteTrack);
        assert_eq!("BoTSORT.yaml".parse::<TrackerKind>()?, TrackerKind::BotSort);
        assert!("deepsort".parse::<TrackerKind>().is_err());
        Ok(())
    }

    #[test]
    fn botsort_differs_only_by_motion_compensation() {
        let byte = TrackerKind::ByteTrack.config();
        let bot = TrackerKind::BotSort.config();
        assert!(!byte.motion_compensation);
        assert!(bot.motion_compensation);
        assert_eq!(
            TrackerConfig {
                motion_compensation: false,
                ..bot
            },
            byte
        );
    }
}
