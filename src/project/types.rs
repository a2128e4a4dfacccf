// Types for project persistence

use crate::sequencer::controller::ControllerInfo;
use crate::sequencer::curve::CurveData;
use crate::sequencer::pattern::PatternId;
use crate::sequencer::track::{KeyInfo, SequenceEntry, TrackId, TrackMode};
use serde::{Deserialize, Serialize};

/// Velocity given to notes saved without one
pub const DEFAULT_VELOCITY: u8 = 64;

/// Document format version
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn current() -> Self {
        Self::new(1, 0)
    }

    /// Same major version
    pub fn is_compatible(&self) -> bool {
        self.major == Self::current().major
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::current()
    }
}

/// One note, stored at its onset
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteElement {
    pub step: u32,
    /// MIDI key
    pub value: u8,
    pub length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CcElement {
    pub number: u8,
    pub step: u32,
    pub value: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurveElement {
    pub number: u32,
    pub points: CurveData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternDocument {
    pub id: PatternId,
    pub name: String,
    /// Beats
    pub length: u32,
    pub steps: u32,
    pub ccsteps: u32,
    #[serde(default)]
    pub notes: Vec<NoteElement>,
    #[serde(default)]
    pub cc: Vec<CcElement>,
    #[serde(default)]
    pub curves: Vec<CurveElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackDocument {
    pub id: TrackId,
    pub name: String,
    #[serde(default)]
    pub mode: TrackMode,
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub patterns: Vec<PatternDocument>,
    #[serde(default)]
    pub sequence: Vec<SequenceEntry>,
    #[serde(default)]
    pub controllers: Vec<ControllerInfo>,
    /// Curves of global controllers
    #[serde(default)]
    pub curves: Vec<CurveElement>,
    #[serde(default)]
    pub keys: Vec<KeyInfo>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TempoElement {
    pub beat: u32,
    pub bpm: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SongDocument {
    #[serde(default)]
    pub version: FormatVersion,
    #[serde(default)]
    pub title: String,
    /// Beats
    pub length: u32,
    #[serde(default)]
    pub loop_start: Option<u32>,
    #[serde(default)]
    pub loop_end: Option<u32>,
    #[serde(default)]
    pub tempo: Vec<TempoElement>,
    #[serde(default)]
    pub tracks: Vec<TrackDocument>,
}
