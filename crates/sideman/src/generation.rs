//! The continuous generation loop.
//!
//! Repeatedly prompts the model, parses its token stream as it arrives,
//! and feeds completed steps straight into playback — audio for a section
//! starts while the model is still writing it. Between generations the
//! finished section folds into the rolling context and the session
//! archive.

use tokio_util::sync::CancellationToken;

use bandstand::Player;
use tracker::{archive, Config, ParsedTrack, StreamParser};

use crate::client::{LlmClient, LlmError, StreamOutcome};
use crate::context::ContextBuffer;
use crate::prompt::PromptBuilder;

/// Stop asking the model for more once this much music is queued.
const MAX_LEAD_SECTIONS: f64 = 6.0;

/// Poll interval while waiting for playback to consume the queue.
const PACING_POLL_MS: u64 = 250;

/// What a session produced, for status lines and the final archive.
#[derive(Debug)]
pub struct SessionSummary {
    pub sections: usize,
    pub aborted: bool,
}

pub struct GenerationLoop {
    client: LlmClient,
    config: Config,
    prompt: PromptBuilder,
    context: ContextBuffer,
    direction: String,
    cancel: CancellationToken,
    sections: Vec<Vec<ParsedTrack>>,
}

impl GenerationLoop {
    pub fn new(
        client: LlmClient,
        config: Config,
        context_steps: usize,
        direction: impl Into<String>,
    ) -> Self {
        Self {
            prompt: PromptBuilder::new(&config),
            context: ContextBuffer::new(context_steps),
            client,
            config,
            direction: direction.into(),
            cancel: CancellationToken::new(),
            sections: Vec::new(),
        }
    }

    /// Token that aborts the in-flight generation and stops the loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Completed sections so far, newest last.
    pub fn sections(&self) -> &[Vec<ParsedTrack>] {
        &self.sections
    }

    /// Run until aborted, the transport fails, or `max_sections` is hit.
    ///
    /// Transport failures propagate; whatever playback already has queued
    /// keeps draining. Abort stops playback immediately.
    pub async fn run(
        &mut self,
        player: &mut Player,
        max_sections: Option<usize>,
    ) -> Result<SessionSummary, LlmError> {
        let mut generated = 0usize;

        loop {
            if max_sections.is_some_and(|max| generated >= max) {
                break;
            }
            if self.cancel.is_cancelled() {
                player.stop_all();
                return Ok(SessionSummary {
                    sections: generated,
                    aborted: true,
                });
            }

            self.wait_for_queue_room(player).await;
            if self.cancel.is_cancelled() {
                continue;
            }

            let messages = self.prompt.messages(&self.context, &self.direction);
            let mut parser = StreamParser::new(self.config.clone());
            let cancel = self.cancel.clone();

            tracing::info!(section = generated + 1, "requesting next section");
            let outcome = self
                .client
                .chat_stream(&messages, &cancel, |delta| {
                    for event in parser.append_chunk(delta) {
                        if let Err(e) =
                            player.enqueue_step(event.instrument, event.step_index as u32, event.step)
                        {
                            tracing::error!(%e, "failed to enqueue step");
                        }
                    }
                })
                .await?;

            match outcome {
                StreamOutcome::Aborted => {
                    // Parser carry is abandoned with the parser.
                    player.stop_all();
                    return Ok(SessionSummary {
                        sections: generated,
                        aborted: true,
                    });
                }
                StreamOutcome::Completed => {
                    let mut tail = parser.finalize();
                    tail.extend(parser.pad_sections());
                    for event in tail {
                        if let Err(e) =
                            player.enqueue_step(event.instrument, event.step_index as u32, event.step)
                        {
                            tracing::error!(%e, "failed to enqueue step");
                        }
                    }

                    let tracks = parser.tracks();
                    if tracks.is_empty() {
                        tracing::warn!("generation produced no parseable steps, retrying");
                        continue;
                    }

                    self.context.incorporate(&archive::render(&tracks, &[]));
                    self.sections.push(tracks);
                    generated += 1;
                    tracing::info!(
                        sections = generated,
                        lead_seconds = player.lead_seconds(),
                        "section complete"
                    );
                }
            }
        }

        Ok(SessionSummary {
            sections: generated,
            aborted: false,
        })
    }

    /// Throttle generation while playback is far enough ahead.
    async fn wait_for_queue_room(&self, player: &Player) {
        let max_lead = MAX_LEAD_SECTIONS * player.section_duration();
        while player.lead_seconds() > max_lead && !self.cancel.is_cancelled() {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(PACING_POLL_MS)) => {}
            }
        }
    }
}
