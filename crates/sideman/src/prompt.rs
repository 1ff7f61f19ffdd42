//! Prompt assembly for the improvising quartet.
//!
//! The session template states the tracker contract (step count, line
//! format, instrument ranges, drum keys); each generation appends the
//! rolling context and any live direction from the user.

use tracker::config::{GM_DRUMS, PITCH_RANGES};
use tracker::{midi_to_name, Config};

use crate::context::ContextBuffer;
use crate::types::ChatMessage;

pub struct PromptBuilder {
    system: String,
    total_steps: u32,
}

impl PromptBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            system: build_system_prompt(config),
            total_steps: config.total_steps(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system
    }

    /// Messages for one generation: the standing contract plus whatever
    /// the band just played and the user's direction.
    pub fn messages(&self, context: &ContextBuffer, direction: &str) -> Vec<ChatMessage> {
        let mut user = String::new();

        if context.is_empty() {
            user.push_str("Start the session. Open with something that establishes the groove.\n");
        } else {
            user.push_str("Here is what the quartet just played:\n\n");
            user.push_str(&context.prompt_chunk());
            user.push_str("\nContinue the improvisation from here.\n");
        }

        if !direction.trim().is_empty() {
            user.push_str(&format!("\nDirection from the bandleader: {}\n", direction.trim()));
        }

        user.push_str(&format!(
            "\nWrite the next {} steps for all four instruments now.\n",
            self.total_steps
        ));

        vec![
            ChatMessage::system(self.system.clone()),
            ChatMessage::user(user),
        ]
    }
}

fn build_system_prompt(config: &Config) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are a jazz quartet improvising live: BASS, DRUMS, PIANO, SAX.\n\
         You write music in a step tracker format, one 16th-note step per line.\n\n",
    );
    prompt.push_str(&format!(
        "Output exactly four sections, in this order and spelling: BASS, DRUMS, PIANO, SAX.\n\
         Each section is the header on its own line, then {} numbered step lines.\n",
        config.total_steps()
    ));
    prompt.push_str(
        "A step line is one of:\n\
         - NOTE:VELOCITY, e.g. `C2:80` (chords comma-separated: `C3:65,E3:60,G3:62`)\n\
         - `.` for a rest\n\
         - `^` to hold the previous notes through this step\n\n",
    );

    prompt.push_str("Stay inside each instrument's range:\n");
    for &(instrument, low, high) in PITCH_RANGES {
        prompt.push_str(&format!(
            "- {}: {} to {}\n",
            instrument.as_str(),
            midi_to_name(low),
            midi_to_name(high),
        ));
    }

    prompt.push_str("\nDRUMS uses General MIDI drum keys:\n");
    for (name, key) in GM_DRUMS {
        prompt.push_str(&format!("- {}: {}\n", name, midi_to_name(*key)));
    }

    prompt.push_str(&format!(
        "\nThe feel is {} BPM swing. No prose, no markdown, no explanations — \
         tracker text only.\n",
        config.tempo
    ));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_states_the_contract() {
        let builder = PromptBuilder::new(&Config::default());
        let system = builder.system_prompt();
        assert!(system.contains("BASS, DRUMS, PIANO, SAX"));
        assert!(system.contains("32 numbered step lines"));
        assert!(system.contains("KICK: C2"));
        assert!(system.contains("120 BPM"));
    }

    #[test]
    fn test_first_generation_has_no_context() {
        let builder = PromptBuilder::new(&Config::default());
        let messages = builder.messages(&ContextBuffer::new(8), "");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[1].content.contains("Start the session"));
    }

    #[test]
    fn test_context_and_direction_appear() {
        let builder = PromptBuilder::new(&Config::default());
        let mut context = ContextBuffer::new(8);
        context.incorporate("BASS\n1 C2:80\n");

        let messages = builder.messages(&context, "half-time feel");
        let user = &messages[1].content;
        assert!(user.contains("BASS (recent):"));
        assert!(user.contains("C2:80"));
        assert!(user.contains("half-time feel"));
    }

    #[test]
    fn test_ranges_rendered_as_note_names() {
        let builder = PromptBuilder::new(&Config::default());
        // Bass range E1..G2.
        assert!(builder.system_prompt().contains("BASS: E1 to G2"));
    }
}
