//! Generation-loop integration: model stream → parser → playback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use bandstand::{AudioClock, MidiSink, Player};
use sideman::{GenerationLoop, LlmClient};
use tracker::{Config, Instrument};

struct RecordingSink {
    log: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
        })
    }

    fn messages(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn push(&self, msg: String) {
        self.log.lock().unwrap().push(msg);
    }
}

impl MidiSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }
    fn program_change(&self, channel: u8, program: u8) {
        self.push(format!("prog {channel} {program}"));
    }
    fn note_on(&self, channel: u8, pitch: u8, velocity: u8) {
        self.push(format!("on {channel} {pitch} {velocity}"));
    }
    fn note_off(&self, channel: u8, pitch: u8) {
        self.push(format!("off {channel} {pitch}"));
    }
    fn control_change(&self, channel: u8, controller: u8, value: u8) {
        self.push(format!("cc {channel} {controller} {value}"));
    }
    fn close(&self) {
        self.push("close".into());
    }
}

fn quartet_text() -> String {
    let mut text = String::new();
    for &inst in &Instrument::ALL {
        text.push_str(inst.as_str());
        text.push('\n');
        for i in 0..32 {
            let line = match i % 4 {
                0 => "C2:80",
                1 => "^",
                2 => ".",
                _ => "E2:75",
            };
            text.push_str(&format!("{} {}\n", i + 1, line));
        }
    }
    text
}

/// Stream `text` as small SSE deltas, then `[DONE]`, for every request.
async fn streaming_server(text: String, stall_after: Option<usize>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let text = text.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 32 * 1024];
                let _ = socket.read(&mut buf).await;
                let head =
                    "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
                socket.write_all(head.as_bytes()).await.unwrap();

                for (i, line) in text.lines().enumerate() {
                    if stall_after.is_some_and(|n| i >= n) {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        return;
                    }
                    let frame = serde_json::json!({
                        "choices": [{"delta": {"content": format!("{line}\n")}}]
                    });
                    let payload = format!("data: {frame}\n\n");
                    if socket.write_all(payload.as_bytes()).await.is_err() {
                        return;
                    }
                }
                let _ = socket.write_all(b"data: [DONE]\n\n").await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn test_one_section_streams_into_playback() {
    let base_url = streaming_server(quartet_text(), None).await;
    let client = LlmClient::new(base_url, None, "test-model", 0.8);
    let config = Config::default();

    let clock = AudioClock::new();
    let sink = RecordingSink::new();
    let mut player = Player::new(config.clone(), clock);
    player.prepare_with_sink(sink.clone(), 0.3);

    let mut generation = GenerationLoop::new(client, config.clone(), 32, "");
    let summary = generation.run(&mut player, Some(1)).await.unwrap();

    assert!(!summary.aborted);
    assert_eq!(summary.sections, 1);
    assert_eq!(generation.sections().len(), 1);
    // A full section of music is queued ahead of the clock.
    assert!(player.lead_seconds() > config.section_duration() * 0.8);

    // Step 0 fires shortly after the prepare lead.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let messages = sink.messages();
    assert!(messages.contains(&"on 0 36 80".to_string()), "{messages:?}");
}

#[tokio::test]
async fn test_abort_mid_generation_stops_playback() {
    // Stall after the bass section so the stream never completes.
    let base_url = streaming_server(quartet_text(), Some(40)).await;
    let client = LlmClient::new(base_url, None, "test-model", 0.8);
    let config = Config::default();

    let clock = AudioClock::new();
    let sink = RecordingSink::new();
    let mut player = Player::new(config.clone(), clock);
    player.prepare_with_sink(sink.clone(), 5.0);

    let mut generation = GenerationLoop::new(client, config.clone(), 32, "");
    let cancel = generation.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
    });

    let summary = generation.run(&mut player, None).await.unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.sections, 0);

    // stop_all silenced every channel and nothing fires afterwards.
    let messages = sink.messages();
    assert!(messages.contains(&"cc 9 120 0".to_string()));
    let count_before = messages.len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.messages().len(), count_before);
}

#[tokio::test]
async fn test_context_threads_between_generations() {
    let base_url = streaming_server(quartet_text(), None).await;
    let client = LlmClient::new(base_url, None, "test-model", 0.8);
    let config = Config::default();

    let clock = AudioClock::new();
    let sink = RecordingSink::new();
    let mut player = Player::new(config.clone(), clock);
    player.prepare_with_sink(sink, 1.0);

    let mut generation = GenerationLoop::new(client, config.clone(), 32, "uptempo");
    let summary = generation.run(&mut player, Some(2)).await.unwrap();

    assert_eq!(summary.sections, 2);
    // Two sections of every instrument accumulated for the archive.
    let sections = generation.sections();
    assert_eq!(sections.len(), 2);
    for section in sections {
        assert_eq!(section.len(), 4);
        assert!(section.iter().all(|t| t.steps.len() == 32));
    }
}
