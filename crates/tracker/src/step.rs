//! Core tracker data types shared across the workspace.

use serde::{Deserialize, Serialize};

/// The four members of the quartet.
///
/// Header spellings in the tracker text are the uppercase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instrument {
    Bass,
    Drums,
    Piano,
    Sax,
}

impl Instrument {
    /// Ensemble order: the order sections appear in tracker text.
    pub const ALL: [Instrument; 4] = [
        Instrument::Bass,
        Instrument::Drums,
        Instrument::Piano,
        Instrument::Sax,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Bass => "BASS",
            Instrument::Drums => "DRUMS",
            Instrument::Piano => "PIANO",
            Instrument::Sax => "SAX",
        }
    }

    /// Match a trimmed line against the section header spellings.
    pub fn from_header(line: &str) -> Option<Instrument> {
        match line {
            "BASS" => Some(Instrument::Bass),
            "DRUMS" => Some(Instrument::Drums),
            "PIANO" => Some(Instrument::Piano),
            "SAX" => Some(Instrument::Sax),
            _ => None,
        }
    }

    pub fn is_drums(&self) -> bool {
        matches!(self, Instrument::Drums)
    }

    /// Dense index for per-instrument arrays.
    pub fn index(&self) -> usize {
        match self {
            Instrument::Bass => 0,
            Instrument::Drums => 1,
            Instrument::Piano => 2,
            Instrument::Sax => 3,
        }
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pitched note with velocity, clamped to MIDI range at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
}

impl NoteEvent {
    pub fn new(pitch: u8, velocity: u8) -> Self {
        Self {
            pitch: pitch.min(127),
            velocity: velocity.min(127),
        }
    }
}

/// One 16th-note cell of a track.
///
/// Exactly one shape holds: sounding notes, a rest, or a tie extending the
/// previous step's notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerStep {
    /// One or more notes triggered at this step.
    Notes(Vec<NoteEvent>),
    /// Silence; any sounding notes are released.
    Rest,
    /// Hold whatever was sounding through this step.
    Tie,
}

impl TrackerStep {
    pub fn is_rest(&self) -> bool {
        matches!(self, TrackerStep::Rest)
    }

    pub fn is_tie(&self) -> bool {
        matches!(self, TrackerStep::Tie)
    }

    /// The notes of a `Notes` step, or an empty slice.
    pub fn notes(&self) -> &[NoteEvent] {
        match self {
            TrackerStep::Notes(notes) => notes,
            _ => &[],
        }
    }
}

/// A parsed step as emitted by the stream parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerLineEvent {
    pub instrument: Instrument,
    /// 0-based index within the current section for this instrument.
    pub step_index: usize,
    pub step: TrackerStep,
    /// The raw line, trimmed and with any leading line number stripped.
    pub line: String,
}

/// A complete track for one instrument, ready for SMF encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTrack {
    pub instrument: Instrument,
    pub steps: Vec<TrackerStep>,
}
