//! Runtime configuration and timing math.
//!
//! A `Config` is built once per session and replaced, never mutated, when
//! the user changes a setting. All step/tick arithmetic lives here so the
//! SMF encoder (ticks) and the live player (seconds) compute swing from the
//! same formula.

use serde::{Deserialize, Serialize};

use crate::step::Instrument;

/// General MIDI Level 1 drum map, by symbolic name.
///
/// Used by the prompt builder so the model writes drum hits on keys the
/// drum channel actually maps.
pub const GM_DRUMS: &[(&str, u8)] = &[
    ("KICK", 36),
    ("SNARE", 38),
    ("CLOSED_HH", 42),
    ("OPEN_HH", 46),
    ("TOM_LOW", 45),
    ("TOM_MID", 48),
    ("TOM_HIGH", 50),
    ("CRASH", 49),
    ("RIDE", 51),
];

/// Comfortable written ranges per melodic instrument, as MIDI note numbers.
pub const PITCH_RANGES: &[(Instrument, u8, u8)] = &[
    (Instrument::Bass, 28, 43),  // E1..G2
    (Instrument::Piano, 48, 72), // C3..C5
    (Instrument::Sax, 57, 77),   // A3..F5
];

/// Immutable runtime parameters for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Tempo in beats per minute.
    pub tempo: u32,
    pub swing_enabled: bool,
    /// Off-beat placement within each 8th-note pair, in [0.5, 1.0).
    pub swing_ratio: f64,
    /// SMF division: ticks per quarter note.
    pub ticks_per_beat: u16,
    pub bars_per_generation: u32,
    pub time_signature: (u32, u32),
    channels: [u8; 4],
    programs: [u8; 4],
}

impl Default for Config {
    fn default() -> Self {
        Self::new(120, 2)
    }
}

impl Config {
    pub fn new(tempo: u32, bars_per_generation: u32) -> Self {
        Self {
            tempo: tempo.max(1),
            swing_enabled: true,
            swing_ratio: 0.67,
            ticks_per_beat: 480,
            bars_per_generation: bars_per_generation.max(1),
            time_signature: (4, 4),
            // BASS, DRUMS (pinned to the GM percussion channel), PIANO, SAX
            channels: [0, 9, 1, 2],
            // Electric Bass (finger), unused, Acoustic Grand, Soprano Sax
            programs: [33, 0, 0, 65],
        }
    }

    /// Set the swing feel. Ratios outside [0.5, 1.0) are musically
    /// meaningless and get clamped with a warning.
    pub fn with_swing(mut self, enabled: bool, ratio: f64) -> Self {
        let clamped = ratio.clamp(0.5, 0.99);
        if (clamped - ratio).abs() > f64::EPSILON {
            tracing::warn!(ratio, clamped, "swing ratio out of range, clamping");
        }
        self.swing_enabled = enabled;
        self.swing_ratio = clamped;
        self
    }

    /// 16th-note steps per bar.
    pub fn steps_per_bar(&self) -> u32 {
        self.time_signature.0 * 4
    }

    /// Steps in one generated section.
    pub fn total_steps(&self) -> u32 {
        self.steps_per_bar() * self.bars_per_generation
    }

    /// MIDI ticks per 16th-note step.
    pub fn ticks_per_step(&self) -> u32 {
        self.ticks_per_beat as u32 / 4
    }

    /// Seconds per 16th-note step at straight timing.
    pub fn seconds_per_step(&self) -> f64 {
        60.0 / (self.tempo as f64 * 4.0)
    }

    /// Tempo meta payload: microseconds per quarter note.
    pub fn microseconds_per_beat(&self) -> u32 {
        (60_000_000.0 / self.tempo as f64).round() as u32
    }

    /// MIDI channel for an instrument. Drums are always channel 9.
    pub fn channel(&self, instrument: Instrument) -> u8 {
        if instrument.is_drums() {
            9
        } else {
            self.channels[instrument.index()]
        }
    }

    /// GM program for a melodic instrument; drums have no program.
    pub fn program(&self, instrument: Instrument) -> Option<u8> {
        if instrument.is_drums() {
            None
        } else {
            Some(self.programs[instrument.index()])
        }
    }

    /// Tick position of step `i`.
    ///
    /// Off-beat 16ths are delayed within their 8th-note pair by the swing
    /// ratio. The section tail boundary `i == total_steps` is always
    /// straight: it only exists to place closing note-offs.
    pub fn step_tick(&self, i: u32) -> u32 {
        let t = self.ticks_per_step();
        if i >= self.total_steps() || !self.swing_enabled {
            return i * t;
        }
        let eighth = t * 2;
        let pair_start = (i / 2) * eighth;
        if i % 2 == 1 {
            pair_start + (eighth as f64 * self.swing_ratio).round() as u32
        } else {
            pair_start
        }
    }

    /// Wall-clock offset of step `i` from the section start, in seconds.
    ///
    /// Same shape as [`Config::step_tick`], scaled to the tempo.
    pub fn step_offset(&self, i: u32) -> f64 {
        let base = self.seconds_per_step();
        if i >= self.total_steps() || !self.swing_enabled {
            return i as f64 * base;
        }
        let eighth = base * 2.0;
        let pair_start = (i / 2) as f64 * eighth;
        if i % 2 == 1 {
            pair_start + eighth * self.swing_ratio
        } else {
            pair_start
        }
    }

    /// Duration of one generated section, in seconds.
    pub fn section_duration(&self) -> f64 {
        self.step_offset(self.total_steps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_values() {
        let config = Config::default();
        assert_eq!(config.steps_per_bar(), 16);
        assert_eq!(config.total_steps(), 32);
        assert_eq!(config.ticks_per_step(), 120);
        assert!((config.seconds_per_step() - 0.125).abs() < 1e-12);
        assert_eq!(config.microseconds_per_beat(), 500_000);
    }

    #[test]
    fn test_drums_pinned_to_channel_9() {
        let config = Config::default();
        assert_eq!(config.channel(Instrument::Drums), 9);
        assert_eq!(config.channel(Instrument::Bass), 0);
        assert_eq!(config.program(Instrument::Drums), None);
        assert_eq!(config.program(Instrument::Bass), Some(33));
    }

    #[test]
    fn test_swing_ratio_clamped() {
        let config = Config::default().with_swing(true, 0.2);
        assert!((config.swing_ratio - 0.5).abs() < 1e-12);
        let config = Config::default().with_swing(true, 1.5);
        assert!((config.swing_ratio - 0.99).abs() < 1e-12);
    }

    #[test]
    fn test_swing_tick_vector() {
        // T=120, ratio=0.67: ticks 0..=4 are 0, 161, 240, 401, 480.
        let config = Config::new(120, 2).with_swing(true, 0.67);
        assert_eq!(config.step_tick(0), 0);
        assert_eq!(config.step_tick(1), 161);
        assert_eq!(config.step_tick(2), 240);
        assert_eq!(config.step_tick(3), 401);
        assert_eq!(config.step_tick(4), 480);
    }

    #[test]
    fn test_swing_tick_law() {
        let config = Config::new(140, 2).with_swing(true, 0.67);
        let t = config.ticks_per_step();
        let swung = (2.0 * t as f64 * config.swing_ratio).round() as u32;
        for i in 1..config.total_steps() {
            let delta = config.step_tick(i) - config.step_tick(i - 1);
            if i % 2 == 1 {
                assert_eq!(delta, swung);
            } else {
                assert_eq!(delta, 2 * t - swung);
            }
        }
    }

    #[test]
    fn test_straight_ticks_without_swing() {
        let config = Config::new(120, 2).with_swing(false, 0.67);
        for i in 0..=config.total_steps() {
            assert_eq!(config.step_tick(i), i * config.ticks_per_step());
        }
    }

    #[test]
    fn test_tail_boundary_is_straight() {
        let config = Config::new(120, 2).with_swing(true, 0.67);
        let n = config.total_steps();
        assert_eq!(config.step_tick(n), n * config.ticks_per_step());
        assert!((config.section_duration() - n as f64 * config.seconds_per_step()).abs() < 1e-12);
    }

    #[test]
    fn test_seconds_follow_tick_shape() {
        let config = Config::new(120, 2).with_swing(true, 0.67);
        // Step 1 at 120 BPM: eighth = 0.25 s, swung offset = 0.25 * 0.67.
        assert!((config.step_offset(1) - 0.1675).abs() < 1e-9);
        assert!((config.step_offset(2) - 0.25).abs() < 1e-9);
    }
}
