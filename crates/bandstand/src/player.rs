//! The playback backend.
//!
//! Consumes tracker steps, keeps per-instrument voice sets, computes swing
//! timing on the audio clock, and issues note-on/note-off through the
//! scheduler to whichever sink is live. Melodic instruments are monophonic
//! voice *sets* (one chord at a time, released before any retrigger);
//! drums are one-shots.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use tracker::{Config, Instrument, TrackerStep};

use crate::clock::AudioClock;
use crate::coordinator::{ReadyStep, SectionCoordinator};
use crate::scheduler::{EventHandle, EventScheduler, EPSILON};
use crate::sinks::{MidiSink, MidirSink, SoundfontSink};

/// Scheduling margin added on top of the sink buffer lead at prepare.
const INITIAL_LOOKAHEAD: f64 = 0.5;

/// Sections of audio runway bought before the first note (soundfont path:
/// generation has to stay ahead of the synth).
const SOUNDFONT_BUFFER_SECTIONS: f64 = 4.0;

/// Buffer lead for external MIDI, which needs no synthesis runway.
const MIDI_BUFFER_LEAD: f64 = 0.2;

/// Drum one-shot gate, in seconds.
const DRUM_GATE: f64 = 0.120;

/// Floor for melodic step durations.
const MIN_STEP_DURATION: f64 = 0.05;

/// Releases replacing a still-ringing voice fire before note-ons at the
/// same instant; natural ends fire after them.
const PRIORITY_RELEASE: i32 = -1;
const PRIORITY_NOTE_ON: i32 = 0;
const PRIORITY_NATURAL_END: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Soundfont,
    Midi,
}

impl BackendKind {
    fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Soundfont => "soundfont",
            BackendKind::Midi => "midi",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerOptions {
    pub preference: BackendKind,
    pub soundfont_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no playback backend available: {0}")]
    Unavailable(String),

    #[error("player is not prepared")]
    NotPrepared,
}

/// A sounding melodic note and the handle to its pending note-off.
struct Voice {
    end: f64,
    off: EventHandle,
}

pub struct Player {
    config: Config,
    clock: AudioClock,
    scheduler: EventScheduler,
    coordinator: SectionCoordinator,
    sink: Option<Arc<dyn MidiSink>>,
    kind: Option<BackendKind>,
    degraded: bool,
    voices: [HashMap<u8, Voice>; 4],
}

impl Player {
    pub fn new(config: Config, clock: AudioClock) -> Self {
        Self {
            coordinator: SectionCoordinator::new(config.clone()),
            scheduler: EventScheduler::new(clock),
            config,
            clock,
            sink: None,
            kind: None,
            degraded: false,
            voices: Default::default(),
        }
    }

    /// Open a sink (preferred first, fallback second) and anchor section 0.
    pub fn prepare(&mut self, options: &PlayerOptions) -> Result<(), PlaybackError> {
        let mut errors = Vec::new();
        let order = match options.preference {
            BackendKind::Soundfont => [BackendKind::Soundfont, BackendKind::Midi],
            BackendKind::Midi => [BackendKind::Midi, BackendKind::Soundfont],
        };

        for kind in order {
            match open_sink(kind, options) {
                Ok(sink) => {
                    let degraded = kind != options.preference;
                    if degraded {
                        tracing::warn!(
                            wanted = options.preference.as_str(),
                            using = kind.as_str(),
                            "preferred backend unavailable, degraded to fallback"
                        );
                    }
                    self.install(sink, kind, degraded);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(backend = kind.as_str(), %e, "backend failed to open");
                    errors.push(format!("{}: {e}", kind.as_str()));
                }
            }
        }

        Err(PlaybackError::Unavailable(errors.join("; ")))
    }

    /// Install an already-open sink with a total scheduling lead. Exposed
    /// so tests can play through a recording sink without audio hardware.
    pub fn prepare_with_sink(&mut self, sink: Arc<dyn MidiSink>, lead: f64) {
        self.stop_all();

        for &instrument in &Instrument::ALL {
            if let Some(program) = self.config.program(instrument) {
                sink.program_change(self.config.channel(instrument), program);
            }
        }

        let start = self.clock.now() + lead;
        self.coordinator.reset(start);
        self.sink = Some(sink);
        tracing::info!(start, lead, "playback prepared");
    }

    fn install(&mut self, sink: Arc<dyn MidiSink>, kind: BackendKind, degraded: bool) {
        let buffer_lead = match kind {
            BackendKind::Soundfont => SOUNDFONT_BUFFER_SECTIONS * self.config.section_duration(),
            BackendKind::Midi => MIDI_BUFFER_LEAD,
        };
        self.prepare_with_sink(sink, buffer_lead + INITIAL_LOOKAHEAD);
        self.kind = Some(kind);
        self.degraded = degraded;
    }

    /// Feed one parsed step. Dispatch happens once all four instruments
    /// have reported this step of the section.
    pub fn enqueue_step(
        &mut self,
        instrument: Instrument,
        step_index: u32,
        step: TrackerStep,
    ) -> Result<(), PlaybackError> {
        if self.sink.is_none() {
            return Err(PlaybackError::NotPrepared);
        }

        let now = self.clock.now();
        if let Some(ready) = self.coordinator.offer(instrument, step_index, step, now) {
            self.dispatch(ready);
        }
        Ok(())
    }

    fn dispatch(&mut self, ready: ReadyStep) {
        let duration = self.step_duration(ready.step_index);
        for (instrument, step) in &ready.steps {
            if instrument.is_drums() {
                self.dispatch_drums(step, ready.start);
            } else {
                self.dispatch_melodic(*instrument, step, ready.start, duration);
            }
        }
    }

    fn step_duration(&self, step_index: u32) -> f64 {
        let next = self.config.step_offset(step_index + 1);
        let this = self.config.step_offset(step_index);
        (next - this).max(MIN_STEP_DURATION)
    }

    fn dispatch_melodic(
        &mut self,
        instrument: Instrument,
        step: &TrackerStep,
        start: f64,
        duration: f64,
    ) {
        let sink = Arc::clone(self.sink.as_ref().expect("dispatch requires a sink"));
        let channel = self.config.channel(instrument);
        let voices = &mut self.voices[instrument.index()];

        match step {
            TrackerStep::Rest => {
                release_voices(&self.scheduler, &sink, channel, voices, start);
            }
            TrackerStep::Tie => {
                // Extend everything still ringing; voices that ended before
                // this step stay closed. A tie with nothing to hold (step 0
                // of a fresh section) is a no-op.
                voices.retain(|&pitch, voice| {
                    if voice.end < start - EPSILON {
                        return false;
                    }
                    voice.off.cancel();
                    let sink = Arc::clone(&sink);
                    voice.off = self.scheduler.schedule(
                        start + duration,
                        PRIORITY_NATURAL_END,
                        move || sink.note_off(channel, pitch),
                    );
                    voice.end = start + duration;
                    true
                });
            }
            TrackerStep::Notes(notes) => {
                release_voices(&self.scheduler, &sink, channel, voices, start);
                for note in notes {
                    let pitch = note.pitch;
                    let velocity = note.velocity.clamp(1, 127);

                    let on_sink = Arc::clone(&sink);
                    self.scheduler.schedule(start, PRIORITY_NOTE_ON, move || {
                        on_sink.note_on(channel, pitch, velocity)
                    });

                    let off_sink = Arc::clone(&sink);
                    let off = self.scheduler.schedule(
                        start + duration,
                        PRIORITY_NATURAL_END,
                        move || off_sink.note_off(channel, pitch),
                    );
                    voices.insert(
                        pitch,
                        Voice {
                            end: start + duration,
                            off,
                        },
                    );
                }
            }
        }
    }

    fn dispatch_drums(&mut self, step: &TrackerStep, start: f64) {
        let TrackerStep::Notes(notes) = step else {
            return; // drums ignore ties and rests
        };
        let sink = self.sink.as_ref().expect("dispatch requires a sink");
        let channel = self.config.channel(Instrument::Drums);

        for note in notes {
            let pitch = note.pitch;
            let velocity = note.velocity.clamp(1, 127);

            let on_sink = Arc::clone(sink);
            self.scheduler.schedule(start, PRIORITY_NOTE_ON, move || {
                on_sink.note_on(channel, pitch, velocity)
            });

            let off_sink = Arc::clone(sink);
            self.scheduler
                .schedule(start + DRUM_GATE, PRIORITY_NATURAL_END, move || {
                    off_sink.note_off(channel, pitch)
                });
        }
    }

    /// Cancel everything queued and silence every channel. Idempotent.
    pub fn stop_all(&mut self) {
        self.scheduler.clear();
        for voices in &mut self.voices {
            voices.clear();
        }
        if let Some(sink) = &self.sink {
            for &instrument in &Instrument::ALL {
                let channel = self.config.channel(instrument);
                sink.control_change(channel, 120, 0); // all sounds off
                sink.control_change(channel, 123, 0); // all notes off
            }
        }
    }

    /// Stop and release the sink.
    pub fn shutdown(&mut self) {
        self.stop_all();
        if let Some(sink) = self.sink.take() {
            sink.close();
        }
        self.kind = None;
    }

    /// Seconds of music queued beyond the clock.
    pub fn lead_seconds(&self) -> f64 {
        if self.sink.is_none() {
            return 0.0;
        }
        let horizon = self.coordinator.max_section_start() + self.config.section_duration();
        (horizon - self.clock.now()).max(0.0)
    }

    pub fn section_duration(&self) -> f64 {
        self.config.section_duration()
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.kind
    }

    /// True when the preferred backend refused and the fallback is live.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

/// Release every live voice at `at`, before any note-on at that instant.
fn release_voices(
    scheduler: &EventScheduler,
    sink: &Arc<dyn MidiSink>,
    channel: u8,
    voices: &mut HashMap<u8, Voice>,
    at: f64,
) {
    for (pitch, voice) in voices.drain() {
        if voice.end < at - EPSILON {
            // Already closed; its note-off fired before the release point.
            continue;
        }
        voice.off.cancel();
        let sink = Arc::clone(sink);
        scheduler.schedule(at, PRIORITY_RELEASE, move || sink.note_off(channel, pitch));
    }
}

fn open_sink(kind: BackendKind, options: &PlayerOptions) -> anyhow::Result<Arc<dyn MidiSink>> {
    match kind {
        BackendKind::Soundfont => {
            let path = options
                .soundfont_path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("no soundfont configured"))?;
            Ok(Arc::new(SoundfontSink::open(path)?))
        }
        BackendKind::Midi => Ok(Arc::new(MidirSink::open()?)),
    }
}
