//! Standard MIDI File encoding with swing-aware tick placement.
//!
//! Always emits a type-1 file: track 0 carries the tempo meta event, then
//! one track per instrument. Tick arithmetic is integer end to end so the
//! same input always serialises byte-identically.

use std::collections::BTreeSet;

use crate::config::Config;
use crate::step::{ParsedTrack, TrackerStep};

/// Gate length for drum one-shots, in ticks.
fn drum_gate(ticks_per_step: u32) -> u32 {
    (ticks_per_step / 2).max(12)
}

/// An event at an absolute tick; encoded with running deltas at the end.
struct MidiEvent {
    tick: u32,
    data: Vec<u8>,
}

/// Accumulates events for one MTrk chunk.
struct TrackWriter {
    events: Vec<MidiEvent>,
}

impl TrackWriter {
    fn new() -> Self {
        Self { events: Vec::new() }
    }

    fn track_name(&mut self, name: &str) {
        let mut data = vec![0xFF, 0x03];
        data.extend(encode_variable_length(name.len() as u32));
        data.extend_from_slice(name.as_bytes());
        self.events.push(MidiEvent { tick: 0, data });
    }

    fn tempo(&mut self, microseconds_per_beat: u32) {
        let us = microseconds_per_beat;
        self.events.push(MidiEvent {
            tick: 0,
            data: vec![
                0xFF,
                0x51,
                0x03,
                ((us >> 16) & 0xFF) as u8,
                ((us >> 8) & 0xFF) as u8,
                (us & 0xFF) as u8,
            ],
        });
    }

    fn program_change(&mut self, channel: u8, program: u8) {
        self.events.push(MidiEvent {
            tick: 0,
            data: vec![0xC0 | (channel & 0x0F), program & 0x7F],
        });
    }

    fn note_on(&mut self, tick: u32, channel: u8, pitch: u8, velocity: u8) {
        // Velocity 0 would read as a note-off; keep triggers audible.
        let velocity = velocity.clamp(1, 127);
        self.events.push(MidiEvent {
            tick,
            data: vec![0x90 | (channel & 0x0F), pitch & 0x7F, velocity],
        });
    }

    fn note_off(&mut self, tick: u32, channel: u8, pitch: u8) {
        self.events.push(MidiEvent {
            tick,
            data: vec![0x80 | (channel & 0x0F), pitch & 0x7F, 0],
        });
    }

    /// Encode the chunk body: delta-timed events plus end-of-track.
    fn encode(mut self) -> Vec<u8> {
        // Stable by tick, so same-tick ordering (offs before ons) holds.
        self.events.sort_by_key(|e| e.tick);

        let mut out = Vec::new();
        let mut last_tick = 0u32;
        for event in &self.events {
            let delta = event.tick.saturating_sub(last_tick);
            out.extend(encode_variable_length(delta));
            out.extend(&event.data);
            last_tick = event.tick;
        }
        out.extend(&[0x00, 0xFF, 0x2F, 0x00]);
        out
    }
}

/// Encode a value as a MIDI variable-length quantity.
fn encode_variable_length(mut value: u32) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }

    let mut bytes = Vec::new();
    bytes.push((value & 0x7F) as u8);
    value >>= 7;
    while value > 0 {
        bytes.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
    bytes.reverse();
    bytes
}

/// Serialise parsed tracks as a type-1 SMF.
pub fn encode(tracks: &[ParsedTrack], config: &Config) -> Vec<u8> {
    let mut chunks: Vec<Vec<u8>> = Vec::new();

    let mut tempo_track = TrackWriter::new();
    tempo_track.tempo(config.microseconds_per_beat());
    chunks.push(tempo_track.encode());

    for track in tracks {
        chunks.push(encode_instrument_track(track, config));
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&(chunks.len() as u16).to_be_bytes());
    out.extend_from_slice(&config.ticks_per_beat.to_be_bytes());

    for chunk in chunks {
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        out.extend(chunk);
    }

    out
}

fn encode_instrument_track(track: &ParsedTrack, config: &Config) -> Vec<u8> {
    let channel = config.channel(track.instrument);
    let mut writer = TrackWriter::new();
    writer.track_name(track.instrument.as_str());
    if let Some(program) = config.program(track.instrument) {
        writer.program_change(channel, program);
    }

    if track.instrument.is_drums() {
        encode_drum_steps(&mut writer, track, config, channel);
    } else {
        encode_melodic_steps(&mut writer, track, config, channel);
    }

    writer.encode()
}

/// Melodic tracks hold notes until the next rest or retrigger; ties extend.
fn encode_melodic_steps(
    writer: &mut TrackWriter,
    track: &ParsedTrack,
    config: &Config,
    channel: u8,
) {
    let mut active: BTreeSet<u8> = BTreeSet::new();

    for (i, step) in track.steps.iter().enumerate() {
        let tick = section_tick(config, i, track.steps.len());
        match step {
            TrackerStep::Tie => {
                // Held notes ring through; nothing to emit.
            }
            TrackerStep::Rest => {
                for pitch in std::mem::take(&mut active) {
                    writer.note_off(tick, channel, pitch);
                }
            }
            TrackerStep::Notes(notes) => {
                // Release before attack at the same tick.
                for pitch in std::mem::take(&mut active) {
                    writer.note_off(tick, channel, pitch);
                }
                for note in notes {
                    writer.note_on(tick, channel, note.pitch, note.velocity);
                    active.insert(note.pitch);
                }
            }
        }
    }

    let tail = section_tick(config, track.steps.len(), track.steps.len());
    for pitch in active {
        writer.note_off(tail, channel, pitch);
    }
}

/// Drum steps are one-shots: short fixed gate, ties and rests are silent.
fn encode_drum_steps(
    writer: &mut TrackWriter,
    track: &ParsedTrack,
    config: &Config,
    channel: u8,
) {
    let gate = drum_gate(config.ticks_per_step());
    for (i, step) in track.steps.iter().enumerate() {
        if let TrackerStep::Notes(notes) = step {
            let tick = section_tick(config, i, track.steps.len());
            for note in notes {
                writer.note_on(tick, channel, note.pitch, note.velocity);
                writer.note_off(tick + gate, channel, note.pitch);
            }
        }
    }
}

/// Tick of step `i` within a possibly multi-section track.
///
/// Steps are placed section-by-section: index `i` maps to section
/// `i / total_steps` at its swung offset, and `i == len` is the closing
/// boundary (straight) used for final note-offs.
fn section_tick(config: &Config, i: usize, len: usize) -> u32 {
    let total = config.total_steps();
    let section_ticks = total * config.ticks_per_step();
    let i = i as u32;
    if i >= len as u32 {
        // Tail boundary after the last step.
        return i * config.ticks_per_step();
    }
    let section = i / total;
    section * section_ticks + config.step_tick(i % total)
}
