//! Rolling context of recent playing.
//!
//! Keeps the last N tracker lines per instrument to prime the next
//! generation with what the quartet just played. Once a ring overflows it
//! stays marked as trimmed so the prompt can say the history is elided.

use std::collections::VecDeque;

use tracker::Instrument;

pub const DEFAULT_CONTEXT_STEPS: usize = 32;

pub struct ContextBuffer {
    capacity: usize,
    rings: [VecDeque<String>; 4],
    trimmed: [bool; 4],
}

impl ContextBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rings: Default::default(),
            trimmed: [false; 4],
        }
    }

    /// Fold a generation's tracker text into the rings.
    ///
    /// The text is partitioned by section headers; line numbers are
    /// stripped, comments and blanks skipped.
    pub fn incorporate(&mut self, tracker_text: &str) {
        let mut current: Option<Instrument> = None;

        for raw in tracker_text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(instrument) = Instrument::from_header(line) {
                current = Some(instrument);
                continue;
            }
            let Some(instrument) = current else { continue };

            let ring = &mut self.rings[instrument.index()];
            ring.push_back(strip_line_number(line).to_string());
            while ring.len() > self.capacity {
                ring.pop_front();
                self.trimmed[instrument.index()] = true;
            }
        }
    }

    /// Render the per-instrument recent history for the next prompt.
    /// `[...]` marks rings that have dropped older lines.
    pub fn prompt_chunk(&self) -> String {
        let mut out = String::new();

        for &instrument in &Instrument::ALL {
            let ring = &self.rings[instrument.index()];
            if ring.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("{} (recent):\n", instrument.as_str()));
            if self.trimmed[instrument.index()] {
                out.push_str("[...]\n");
            }
            for line in ring {
                out.push_str(line);
                out.push('\n');
            }
        }

        out
    }

    pub fn is_empty(&self) -> bool {
        self.rings.iter().all(|r| r.is_empty())
    }

    pub fn reset(&mut self) {
        for ring in &mut self.rings {
            ring.clear();
        }
        self.trimmed = [false; 4];
    }
}

fn strip_line_number(line: &str) -> &str {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return line;
    }
    let mut rest = &line[digits..];
    if let Some(stripped) = rest.strip_prefix('.') {
        rest = stripped;
    }
    if rest.starts_with(char::is_whitespace) {
        rest.trim_start()
    } else {
        line
    }
}
