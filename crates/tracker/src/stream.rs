//! Incremental tracker-stream parser.
//!
//! LLM tokens arrive in arbitrary chunks; this parser buffers the partial
//! trailing line across chunk boundaries and emits a typed
//! [`TrackerLineEvent`] for every complete step line. Malformed steps are
//! logged and skipped — step counting is post-validation, so a bad line
//! never shifts later steps.

use thiserror::Error;

use crate::config::Config;
use crate::note::{note_to_midi, NoteError};
use crate::step::{Instrument, NoteEvent, ParsedTrack, TrackerLineEvent, TrackerStep};

/// Errors from a single step line. Recoverable: the stream continues.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed step (expected NOTE:VELOCITY): {0}")]
    MalformedStep(String),

    #[error(transparent)]
    Note(#[from] NoteError),
}

/// Strip a leading line number of the form `12 ` or `12. `.
fn strip_line_number(line: &str) -> &str {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return line;
    }
    let mut rest = &line[digits..];
    if let Some(stripped) = rest.strip_prefix('.') {
        rest = stripped;
    }
    // Only a number followed by whitespace is a line number; `42:90` is a
    // (bad) note entry, not a numbered line.
    if rest.starts_with(char::is_whitespace) {
        rest.trim_start()
    } else {
        line
    }
}

/// Parse one step body: `.`/empty is a rest, `^` a tie, otherwise
/// comma-separated `PITCH:VELOCITY` parts with trailing `.,;` tolerated.
pub fn parse_note_entry(body: &str) -> Result<TrackerStep, ParseError> {
    let body = body.trim().trim_end_matches(['.', ',', ';']).trim();

    if body.is_empty() {
        return Ok(TrackerStep::Rest);
    }
    if body == "^" {
        return Ok(TrackerStep::Tie);
    }

    let mut notes = Vec::new();
    for part in body.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (pitch_str, velocity_str) = part
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedStep(part.to_string()))?;

        // Velocities sometimes arrive with trailing junk; keep the digits.
        let digits: String = velocity_str.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(ParseError::MalformedStep(part.to_string()));
        }
        let velocity = digits.parse::<u32>().unwrap_or(127).min(127) as u8;

        let pitch = note_to_midi(pitch_str.trim())?;
        notes.push(NoteEvent::new(pitch, velocity));
    }

    if notes.is_empty() {
        Ok(TrackerStep::Rest)
    } else {
        Ok(TrackerStep::Notes(notes))
    }
}

#[derive(Debug, Default)]
struct TrackState {
    /// Steps emitted in the current section; capped at `total_steps`.
    section_count: usize,
    /// All steps across sections, for SMF export of the whole run.
    steps: Vec<TrackerStep>,
    /// Raw lines matching `steps`.
    lines: Vec<String>,
}

/// Streaming parser for the tracker format.
pub struct StreamParser {
    config: Config,
    partial: String,
    current: Option<Instrument>,
    tracks: [TrackState; 4],
}

impl StreamParser {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            partial: String::new(),
            current: None,
            tracks: Default::default(),
        }
    }

    /// Feed a chunk of streamed text. Returns the steps completed by it.
    pub fn append_chunk(&mut self, chunk: &str) -> Vec<TrackerLineEvent> {
        let mut events = Vec::new();
        let buffered = std::mem::take(&mut self.partial) + chunk;

        let mut segments = buffered.split('\n').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                // Trailing segment: may be an incomplete line, carry it.
                self.partial = segment.to_string();
            } else {
                self.process_line(segment, &mut events);
            }
        }

        events
    }

    /// Flush the carried partial line at end of stream.
    pub fn finalize(&mut self) -> Vec<TrackerLineEvent> {
        let mut events = Vec::new();
        let partial = std::mem::take(&mut self.partial);
        if !partial.trim().is_empty() {
            self.process_line(&partial, &mut events);
        }
        events
    }

    fn process_line(&mut self, raw: &str, events: &mut Vec<TrackerLineEvent>) {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return;
        }

        if let Some(instrument) = Instrument::from_header(line) {
            let state = &mut self.tracks[instrument.index()];
            if state.section_count > 0 {
                // Repeated header: the instrument wraps into a new section.
                state.section_count = 0;
            }
            self.current = Some(instrument);
            return;
        }

        let Some(instrument) = self.current else {
            tracing::warn!(line, "step data before any instrument header, skipping");
            return;
        };

        let state = &mut self.tracks[instrument.index()];
        if state.section_count >= self.config.total_steps() as usize {
            tracing::debug!(%instrument, line, "section full, dropping overflow step");
            return;
        }

        let body = strip_line_number(line);
        match parse_note_entry(body) {
            Ok(step) => {
                let step_index = state.section_count;
                state.section_count += 1;
                state.steps.push(step.clone());
                state.lines.push(body.to_string());
                events.push(TrackerLineEvent {
                    instrument,
                    step_index,
                    step,
                    line: body.to_string(),
                });
            }
            Err(err) => {
                tracing::warn!(%instrument, line, %err, "skipping malformed step");
            }
        }
    }

    /// Everything parsed so far, one track per instrument that appeared.
    pub fn tracks(&self) -> Vec<ParsedTrack> {
        Instrument::ALL
            .iter()
            .filter_map(|&instrument| {
                let state = &self.tracks[instrument.index()];
                if state.steps.is_empty() {
                    None
                } else {
                    Some(ParsedTrack {
                        instrument,
                        steps: state.steps.clone(),
                    })
                }
            })
            .collect()
    }

    /// Raw lines consumed for one instrument (validated steps only).
    pub fn lines(&self, instrument: Instrument) -> &[String] {
        &self.tracks[instrument.index()].lines
    }

    /// Pad every instrument up to `total_steps` with rests.
    ///
    /// Models sometimes under-generate a section; padding keeps the four
    /// tracks the same length so lock-step dispatch never stalls waiting
    /// for steps that will never arrive.
    pub fn pad_sections(&mut self) -> Vec<TrackerLineEvent> {
        let total = self.config.total_steps() as usize;
        let mut events = Vec::new();

        // A completely empty generation pads nothing; otherwise every
        // instrument is brought to length, including ones the model
        // skipped entirely.
        if self.tracks.iter().all(|t| t.section_count == 0) {
            return events;
        }

        for &instrument in &Instrument::ALL {
            let state = &mut self.tracks[instrument.index()];
            let missing = total.saturating_sub(state.section_count);
            if missing > 0 {
                tracing::warn!(%instrument, missing, "padding short section with rests");
            }
            while state.section_count < total {
                let step_index = state.section_count;
                state.section_count += 1;
                state.steps.push(TrackerStep::Rest);
                state.lines.push(".".to_string());
                events.push(TrackerLineEvent {
                    instrument,
                    step_index,
                    step: TrackerStep::Rest,
                    line: ".".to_string(),
                });
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> StreamParser {
        StreamParser::new(Config::default())
    }

    #[test]
    fn test_rest_tie_and_chord_entries() {
        assert_eq!(parse_note_entry(".").unwrap(), TrackerStep::Rest);
        assert_eq!(parse_note_entry("").unwrap(), TrackerStep::Rest);
        assert_eq!(parse_note_entry("^").unwrap(), TrackerStep::Tie);

        let step = parse_note_entry("C3:65,E3:60,G3:62").unwrap();
        assert_eq!(
            step.notes(),
            &[
                NoteEvent::new(48, 65),
                NoteEvent::new(52, 60),
                NoteEvent::new(55, 62),
            ]
        );
    }

    #[test]
    fn test_trailing_junk_tolerated() {
        let step = parse_note_entry("C4:70,E4:65,").unwrap();
        assert_eq!(step.notes().len(), 2);
        let step = parse_note_entry("C4:70.").unwrap();
        assert_eq!(step.notes(), &[NoteEvent::new(60, 70)]);
        // Velocity with trailing junk keeps its digits.
        let step = parse_note_entry("C4:80!").unwrap();
        assert_eq!(step.notes(), &[NoteEvent::new(60, 80)]);
    }

    #[test]
    fn test_malformed_entries() {
        assert!(matches!(
            parse_note_entry("C4 80"),
            Err(ParseError::MalformedStep(_))
        ));
        assert!(matches!(
            parse_note_entry("C4:abc"),
            Err(ParseError::MalformedStep(_))
        ));
        assert!(matches!(
            parse_note_entry("X4:80"),
            Err(ParseError::Note(_))
        ));
    }

    #[test]
    fn test_velocity_clamped() {
        let step = parse_note_entry("C4:300").unwrap();
        assert_eq!(step.notes()[0].velocity, 127);
    }

    #[test]
    fn test_line_numbers_stripped() {
        assert_eq!(strip_line_number("1 C2:80"), "C2:80");
        assert_eq!(strip_line_number("12. C2:80"), "C2:80");
        assert_eq!(strip_line_number("C2:80"), "C2:80");
        // A bare entry starting with digits is not a line number.
        assert_eq!(strip_line_number("42:90"), "42:90");
    }

    #[test]
    fn test_chunk_boundary_mid_line() {
        let mut p = parser();
        let first = p.append_chunk("BASS\n1 C2");
        assert!(first.is_empty());
        let second = p.append_chunk(":80\n2 .\n");
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].step_index, 0);
        assert_eq!(second[0].step.notes(), &[NoteEvent::new(36, 80)]);
        assert_eq!(second[1].step_index, 1);
        assert!(second[1].step.is_rest());
    }

    #[test]
    fn test_finalize_flushes_carry() {
        let mut p = parser();
        p.append_chunk("SAX\n1 E4:85");
        let events = p.finalize();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].instrument, Instrument::Sax);
        assert_eq!(events[0].step.notes(), &[NoteEvent::new(64, 85)]);
    }

    #[test]
    fn test_malformed_step_does_not_shift_indices() {
        let mut p = parser();
        let events = p.append_chunk("BASS\n1 C2:abc\n2 D2:80\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step_index, 0);
        assert_eq!(events[0].step.notes(), &[NoteEvent::new(38, 80)]);
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let mut p = parser();
        let events = p.append_chunk("# tempo: 120\n\nBASS\n# groove\n1 C2:80\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_step_cap_per_section() {
        let mut p = parser();
        let total = Config::default().total_steps() as usize;
        let mut text = String::from("BASS\n");
        for i in 0..total + 8 {
            text.push_str(&format!("{} C2:80\n", i + 1));
        }
        let events = p.append_chunk(&text);
        assert_eq!(events.len(), total);
        assert_eq!(p.lines(Instrument::Bass).len(), total);
    }

    #[test]
    fn test_repeated_header_starts_new_section() {
        let mut p = parser();
        p.append_chunk("BASS\n1 C2:80\n2 .\n");
        let events = p.append_chunk("BASS\n1 E2:75\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step_index, 0);
        // Steps keep accumulating for export.
        assert_eq!(p.tracks()[0].steps.len(), 3);
    }

    #[test]
    fn test_pad_sections_fills_missing_steps_and_instruments() {
        let mut p = parser();
        p.append_chunk("BASS\n1 C2:80\n2 .\n");
        let padded = p.pad_sections();

        let total = Config::default().total_steps() as usize;
        // Bass gets the remainder, the other three a full rest section.
        assert_eq!(padded.len(), (total - 2) + 3 * total);
        assert!(padded.iter().all(|e| e.step.is_rest()));

        let tracks = p.tracks();
        assert_eq!(tracks.len(), 4);
        assert!(tracks.iter().all(|t| t.steps.len() == total));
    }

    #[test]
    fn test_pad_sections_on_empty_stream_is_noop() {
        let mut p = parser();
        p.append_chunk("# nothing but comments\n");
        assert!(p.pad_sections().is_empty());
    }

    #[test]
    fn test_data_before_header_ignored() {
        let mut p = parser();
        let events = p.append_chunk("1 C2:80\nBASS\n1 C2:80\n");
        assert_eq!(events.len(), 1);
    }
}
