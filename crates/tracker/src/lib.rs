//! Tracker notation core.
//!
//! The quartet improvises in a minimal line-oriented tracker format: one
//! 16th-note step per line, four instrument sections per generation. This
//! crate owns everything that understands that notation — the runtime
//! configuration and its timing math, the note-name codec, the incremental
//! stream parser that turns LLM token chunks into typed steps, the
//! swing-aware Standard MIDI File encoder, and the archive renderer.

pub mod archive;
pub mod config;
pub mod note;
pub mod smf;
pub mod step;
pub mod stream;

pub use config::Config;
pub use note::{midi_to_frequency, midi_to_name, note_to_midi, NoteError};
pub use step::{Instrument, NoteEvent, ParsedTrack, TrackerLineEvent, TrackerStep};
pub use stream::{ParseError, StreamParser};
