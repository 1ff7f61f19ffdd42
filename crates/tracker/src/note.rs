//! Note-name ↔ MIDI number codec.
//!
//! Accepts names of the form `[A-G][#|b]?<octave>` with an optional negative
//! octave (`C-1` is MIDI 0). Unicode accidentals are normalised to ASCII
//! before parsing. Enharmonic spellings that cross an octave boundary are
//! handled the way players expect: `Cb4` is `B3`, `B#3` is `C4`.

use thiserror::Error;

/// Errors from note-name parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoteError {
    #[error("invalid note name: {0}")]
    InvalidNote(String),

    #[error("note {name} out of MIDI range (0-127): {value}")]
    OutOfRange { name: String, value: i32 },
}

/// Semitone offset within an octave for a letter + optional accidental.
fn semitone_offset(letter: char, accidental: Option<char>) -> Option<i32> {
    let base = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let shift = match accidental {
        None => 0,
        Some('#') => 1,
        Some('b') => -1,
        Some(_) => return None,
    };
    Some(base + shift)
}

/// Replace Unicode accidentals with their ASCII equivalents.
///
/// Naturals are dropped entirely: `E♮4` parses as `E4`.
fn normalize_accidentals(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '♯' => out.push('#'),
            '♭' => out.push('b'),
            '♮' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Convert a note name to its MIDI number.
///
/// Middle C (`C4`) is 60. `Cb` drops an octave and `B#` gains one, so
/// `Cb4` → 59 and `B#3` → 60.
pub fn note_to_midi(name: &str) -> Result<u8, NoteError> {
    let normalized = normalize_accidentals(name.trim());
    let mut chars = normalized.chars();

    let letter = chars
        .next()
        .ok_or_else(|| NoteError::InvalidNote(name.to_string()))?;

    let rest: String = chars.collect();
    let (accidental, octave_str) = match rest.chars().next() {
        Some(c @ ('#' | 'b')) => (Some(c), &rest[1..]),
        _ => (None, rest.as_str()),
    };

    let mut octave: i32 = octave_str
        .parse()
        .map_err(|_| NoteError::InvalidNote(name.to_string()))?;

    let offset = semitone_offset(letter, accidental)
        .ok_or_else(|| NoteError::InvalidNote(name.to_string()))?;

    // Enharmonics that cross the octave boundary: Cb4 = B3, B#3 = C4.
    match (letter, accidental) {
        ('C', Some('b')) => octave -= 1,
        ('B', Some('#')) => octave += 1,
        _ => {}
    }
    // The wrapped offset stays within the adjusted octave.
    let offset = offset.rem_euclid(12);

    let midi = (octave + 1) * 12 + offset;
    if !(0..=127).contains(&midi) {
        return Err(NoteError::OutOfRange {
            name: name.to_string(),
            value: midi,
        });
    }

    Ok(midi as u8)
}

/// Equal-tempered frequency for a MIDI note number, A4 = 440 Hz.
pub fn midi_to_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}

/// Display name for a MIDI note number, using sharp spellings.
pub fn midi_to_name(note: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    let octave = (note as i32 / 12) - 1;
    format!("{}{}", NAMES[(note % 12) as usize], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_notes() {
        assert_eq!(note_to_midi("C4").unwrap(), 60);
        assert_eq!(note_to_midi("A4").unwrap(), 69);
        assert_eq!(note_to_midi("C-1").unwrap(), 0);
        assert_eq!(note_to_midi("G9").unwrap(), 127);
    }

    #[test]
    fn test_accidentals() {
        assert_eq!(note_to_midi("A#3").unwrap(), 58);
        assert_eq!(note_to_midi("Bb3").unwrap(), 58);
        assert_eq!(note_to_midi("Gb5").unwrap(), 78);
        assert_eq!(note_to_midi("F#5").unwrap(), 78);
    }

    #[test]
    fn test_unicode_accidentals() {
        assert_eq!(note_to_midi("A♯3").unwrap(), 58);
        assert_eq!(note_to_midi("B♭3").unwrap(), 58);
        assert_eq!(note_to_midi("E♮4").unwrap(), 64);
    }

    #[test]
    fn test_enharmonic_octave_crossings() {
        // Cb4 is B3; B#3 is C4.
        assert_eq!(note_to_midi("Cb4").unwrap(), 59);
        assert_eq!(note_to_midi("B#3").unwrap(), 60);
        assert_eq!(note_to_midi("Fb4").unwrap(), 64);
        assert_eq!(note_to_midi("E#4").unwrap(), 65);
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(
            note_to_midi("H4"),
            Err(NoteError::InvalidNote(_))
        ));
        assert!(matches!(note_to_midi(""), Err(NoteError::InvalidNote(_))));
        assert!(matches!(
            note_to_midi("C"),
            Err(NoteError::InvalidNote(_))
        ));
        assert!(matches!(
            note_to_midi("4C"),
            Err(NoteError::InvalidNote(_))
        ));
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(
            note_to_midi("C-2"),
            Err(NoteError::OutOfRange { .. })
        ));
        assert!(matches!(
            note_to_midi("A9"),
            Err(NoteError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_frequency() {
        assert!((midi_to_frequency(69) - 440.0).abs() < 1e-9);
        assert!((midi_to_frequency(60) - 261.6255653).abs() < 1e-6);
        assert!((midi_to_frequency(81) - 880.0).abs() < 1e-9);
    }

    #[test]
    fn test_midi_to_name() {
        assert_eq!(midi_to_name(60), "C4");
        assert_eq!(midi_to_name(58), "A#3");
        assert_eq!(midi_to_name(0), "C-1");
    }
}
