//! Section coordinator.
//!
//! Each instrument's stream wraps independently into numbered sections;
//! sections with the same index share one wall-clock start time. The
//! coordinator detects wraps, assigns monotonic section starts, shifts
//! future sections forward when a step would arrive inside the look-ahead
//! window, and holds steps in a per-`(section, step)` buffer until all four
//! instruments have reported so the quartet dispatches in lock-step.

use std::collections::{BTreeMap, HashMap};

use tracker::{Config, Instrument, TrackerStep};

/// Minimum scheduling distance ahead of the clock, in seconds.
pub const SECTION_LOOKAHEAD: f64 = 0.150;

/// A fully assembled quartet step, ready for the scheduler.
#[derive(Debug)]
pub struct ReadyStep {
    pub section: u64,
    pub step_index: u32,
    /// Absolute start time on the audio clock.
    pub start: f64,
    /// One entry per instrument, ensemble order.
    pub steps: Vec<(Instrument, TrackerStep)>,
}

pub struct SectionCoordinator {
    config: Config,
    last_step: [i64; 4],
    section_index: [u64; 4],
    section_starts: BTreeMap<u64, f64>,
    max_section_start: f64,
    pending: HashMap<(u64, u32), [Option<TrackerStep>; 4]>,
}

impl SectionCoordinator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            last_step: [-1; 4],
            section_index: [0; 4],
            section_starts: BTreeMap::new(),
            max_section_start: 0.0,
            pending: HashMap::new(),
        }
    }

    /// Begin a session: section 0 starts at `start_time`.
    pub fn reset(&mut self, start_time: f64) {
        self.last_step = [-1; 4];
        self.section_index = [0; 4];
        self.section_starts = BTreeMap::from([(0, start_time)]);
        self.max_section_start = start_time;
        self.pending.clear();
    }

    /// Furthest known section start, for lead reporting.
    pub fn max_section_start(&self) -> f64 {
        self.max_section_start
    }

    /// Offer one instrument's step. Returns the combined quartet step once
    /// all four instruments have reported this `(section, step_index)`.
    pub fn offer(
        &mut self,
        instrument: Instrument,
        step_index: u32,
        step: TrackerStep,
        now: f64,
    ) -> Option<ReadyStep> {
        let idx = instrument.index();

        // A step index moving backwards means this instrument wrapped into
        // the next section.
        if self.last_step[idx] >= 0 && (step_index as i64) < self.last_step[idx] {
            self.section_index[idx] += 1;
            self.prune_stale();
        }
        self.last_step[idx] = step_index as i64;

        let section = self.section_index[idx];
        self.ensure_section_start(section, now);

        // If the target time has slipped inside the look-ahead window, push
        // this section (and everything after it) forward by the deficit.
        let target = self.section_starts[&section] + self.config.step_offset(step_index);
        let horizon = now + SECTION_LOOKAHEAD;
        if target < horizon {
            let deficit = horizon - target;
            tracing::debug!(
                section,
                step_index,
                deficit_ms = (deficit * 1000.0) as u64,
                "section running late, shifting forward"
            );
            for start in self.section_starts.range_mut(section..).map(|(_, v)| v) {
                *start += deficit;
            }
            self.max_section_start = self
                .section_starts
                .values()
                .fold(self.max_section_start, |acc, &v| acc.max(v));
        }

        let slot = self
            .pending
            .entry((section, step_index))
            .or_insert_with(|| [None, None, None, None]);
        slot[idx] = Some(step);

        if slot.iter().all(|s| s.is_some()) {
            let slot = self.pending.remove(&(section, step_index)).unwrap();
            let start = self.section_starts[&section] + self.config.step_offset(step_index);
            let steps = Instrument::ALL
                .iter()
                .map(|&inst| (inst, slot[inst.index()].clone().unwrap()))
                .collect();
            Some(ReadyStep {
                section,
                step_index,
                start,
                steps,
            })
        } else {
            None
        }
    }

    /// First instrument into a section fixes its start time.
    fn ensure_section_start(&mut self, section: u64, now: f64) {
        if self.section_starts.contains_key(&section) {
            return;
        }
        let prev = section
            .checked_sub(1)
            .and_then(|p| self.section_starts.get(&p).copied())
            .unwrap_or(self.max_section_start);
        let natural = prev + self.config.section_duration();
        let start = natural.max(now + SECTION_LOOKAHEAD);
        self.section_starts.insert(section, start);
        self.max_section_start = self.max_section_start.max(start);
    }

    /// Sections every instrument has moved past are dead: their steps can
    /// never complete and their start times are no longer needed.
    fn prune_stale(&mut self) {
        let min_section = *self.section_index.iter().min().unwrap_or(&0);
        let keep_from = min_section.saturating_sub(1);
        self.pending.retain(|&(s, _), _| s >= keep_from);
        self.section_starts.retain(|&s, _| s >= keep_from);
    }

    /// Section start times currently known, ascending by section.
    pub fn section_starts(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.section_starts.iter().map(|(&s, &t)| (s, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> SectionCoordinator {
        let mut c = SectionCoordinator::new(Config::default());
        c.reset(10.0);
        c
    }

    fn offer_all(
        c: &mut SectionCoordinator,
        step_index: u32,
        now: f64,
    ) -> Option<ReadyStep> {
        let mut ready = None;
        for &inst in &Instrument::ALL {
            ready = c.offer(inst, step_index, TrackerStep::Rest, now);
        }
        ready
    }

    #[test]
    fn test_dispatch_waits_for_all_four() {
        let mut c = coordinator();
        assert!(c
            .offer(Instrument::Bass, 0, TrackerStep::Rest, 0.0)
            .is_none());
        assert!(c
            .offer(Instrument::Drums, 0, TrackerStep::Rest, 0.0)
            .is_none());
        assert!(c
            .offer(Instrument::Piano, 0, TrackerStep::Rest, 0.0)
            .is_none());

        let ready = c
            .offer(Instrument::Sax, 0, TrackerStep::Rest, 0.0)
            .expect("fourth instrument completes the step");
        assert_eq!(ready.section, 0);
        assert_eq!(ready.step_index, 0);
        assert!((ready.start - 10.0).abs() < 1e-9);
        assert_eq!(ready.steps.len(), 4);
    }

    #[test]
    fn test_wrap_assigns_next_section_start() {
        let mut c = coordinator();
        let section_duration = Config::default().section_duration();

        for i in 0..32 {
            offer_all(&mut c, i, 0.0);
        }
        // Index restarts at 0: every instrument wraps into section 1.
        let ready = offer_all(&mut c, 0, 0.0).unwrap();
        assert_eq!(ready.section, 1);
        assert!((ready.start - (10.0 + section_duration)).abs() < 1e-9);
    }

    #[test]
    fn test_sections_share_start_across_instruments() {
        let mut c = coordinator();

        // Bass wraps early (short first section), sax is still on its way.
        for i in 0..16 {
            c.offer(Instrument::Bass, i, TrackerStep::Rest, 0.0);
        }
        c.offer(Instrument::Bass, 0, TrackerStep::Rest, 0.0);
        let bass_section1_start = c.section_starts().find(|&(s, _)| s == 1).unwrap().1;

        for i in 0..8 {
            c.offer(Instrument::Sax, i, TrackerStep::Rest, 0.0);
        }
        c.offer(Instrument::Sax, 0, TrackerStep::Rest, 0.0);
        let sax_section1_start = c.section_starts().find(|&(s, _)| s == 1).unwrap().1;

        assert!((bass_section1_start - sax_section1_start).abs() < 1e-9);
    }

    #[test]
    fn test_late_step_shifts_section_forward() {
        let mut c = coordinator();
        // Section 0 starts at 10.0 but the clock is already past it.
        let now = 12.0;
        let ready = offer_all(&mut c, 0, now).unwrap();
        assert!(ready.start >= now + SECTION_LOOKAHEAD - 1e-9);
    }

    #[test]
    fn test_shift_moves_later_sections_too() {
        let mut c = coordinator();
        let section_duration = Config::default().section_duration();

        // Enter section 1 at its natural spot.
        for i in 0..32 {
            offer_all(&mut c, i, 0.0);
        }
        offer_all(&mut c, 0, 0.0);

        // Section 0 steps arriving way late shift both sections.
        let late_now = 30.0;
        // Bass is in section 1 now; a fresh section-1 step arriving late
        // must not land before the horizon.
        let ready = offer_all(&mut c, 1, late_now).unwrap();
        assert!(ready.start >= late_now + SECTION_LOOKAHEAD - 1e-9);

        let starts: Vec<(u64, f64)> = c.section_starts().collect();
        assert!(starts.windows(2).all(|w| w[1].1 > w[0].1));
    }

    #[test]
    fn test_section_starts_stay_monotonic() {
        let mut c = coordinator();
        for round in 0..4 {
            for i in 0..32 {
                // Jittered arrival clock.
                let now = round as f64 * 3.0 + i as f64 * 0.1;
                offer_all(&mut c, i, now);
            }
        }
        let starts: Vec<(u64, f64)> = c.section_starts().collect();
        assert!(starts.len() >= 2);
        assert!(starts.windows(2).all(|w| w[1].1 > w[0].1));
    }

    #[test]
    fn test_per_instrument_step_times_never_regress() {
        let mut c = coordinator();
        let mut last_start = f64::MIN;
        for round in 0..3 {
            for i in 0..32 {
                let now = round as f64 * 2.5 + i as f64 * 0.05;
                if let Some(ready) = offer_all(&mut c, i, now) {
                    assert!(
                        ready.start > last_start,
                        "step start regressed: {} after {}",
                        ready.start,
                        last_start
                    );
                    last_start = ready.start;
                }
            }
        }
    }
}
