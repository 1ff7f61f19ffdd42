//! Output sinks: soundfont synthesis and external MIDI.
//!
//! Both sinks expose the same small message surface and are driven by the
//! scheduler at fire time, so swapping one for the other never touches
//! playback logic. At most one sink is live at a time.

use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};

/// Capability set shared by all playback sinks.
pub trait MidiSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn program_change(&self, channel: u8, program: u8);
    fn note_on(&self, channel: u8, pitch: u8, velocity: u8);
    fn note_off(&self, channel: u8, pitch: u8);
    fn control_change(&self, channel: u8, controller: u8, value: u8);
    /// Release the underlying device. Further sends are silently dropped.
    fn close(&self);
}

/// Software synthesis through a SoundFont.
///
/// A dedicated thread owns the cpal stream (streams are not `Send`); the
/// synthesiser itself sits behind a mutex shared with the audio callback,
/// which renders whatever is ringing each buffer.
pub struct SoundfontSink {
    synth: Arc<Mutex<Synthesizer>>,
    stop_tx: mpsc::Sender<()>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SoundfontSink {
    pub fn open(soundfont_path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(soundfont_path)
            .with_context(|| format!("opening soundfont {}", soundfont_path.display()))?;
        let sound_font = Arc::new(
            SoundFont::new(&mut file)
                .map_err(|e| anyhow!("failed to load soundfont: {e:?}"))?,
        );

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = mpsc::channel();

        let join = thread::Builder::new()
            .name("soundfont-audio".into())
            .spawn(move || run_audio_thread(sound_font, ready_tx, stop_rx))?;

        let synth = ready_rx
            .recv()
            .map_err(|_| anyhow!("audio thread exited before reporting ready"))??;

        Ok(Self {
            synth,
            stop_tx,
            join: Mutex::new(Some(join)),
        })
    }
}

/// Built on the audio thread so the synthesiser matches the device rate.
type ReadySender = mpsc::SyncSender<Result<Arc<Mutex<Synthesizer>>>>;

fn run_audio_thread(sound_font: Arc<SoundFont>, ready_tx: ReadySender, stop_rx: mpsc::Receiver<()>) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err(anyhow!("no default audio output device")));
        return;
    };

    let stream_config = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(anyhow!("no output config: {e}")));
            return;
        }
    };
    let sample_rate = stream_config.sample_rate().0;
    let channels = stream_config.channels() as usize;

    let settings = SynthesizerSettings::new(sample_rate as i32);
    let synth = match Synthesizer::new(&sound_font, &settings) {
        Ok(s) => Arc::new(Mutex::new(s)),
        Err(e) => {
            let _ = ready_tx.send(Err(anyhow!("failed to create synthesizer: {e:?}")));
            return;
        }
    };

    let render_synth = Arc::clone(&synth);
    let mut left: Vec<f32> = Vec::new();
    let mut right: Vec<f32> = Vec::new();

    let data_callback = move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
        let frames = data.len() / channels;
        if left.len() != frames {
            left.resize(frames, 0.0);
            right.resize(frames, 0.0);
        }
        render_synth.lock().render(&mut left[..frames], &mut right[..frames]);

        for frame in 0..frames {
            let base = frame * channels;
            data[base] = left[frame];
            if channels > 1 {
                data[base + 1] = right[frame];
            }
            for ch in 2..channels {
                data[base + ch] = 0.0;
            }
        }
    };

    let stream = match device.build_output_stream(
        &stream_config.config(),
        data_callback,
        |err| tracing::error!(%err, "cpal stream error"),
        None,
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(anyhow!("failed to build output stream: {e}")));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(anyhow!("failed to start output stream: {e}")));
        return;
    }

    tracing::info!(sample_rate, "soundfont audio stream running");
    let _ = ready_tx.send(Ok(synth));

    // Park until close; the stream dies with this thread.
    let _ = stop_rx.recv();
    drop(stream);
}

impl MidiSink for SoundfontSink {
    fn name(&self) -> &'static str {
        "soundfont"
    }

    fn program_change(&self, channel: u8, program: u8) {
        self.synth
            .lock()
            .process_midi_message(channel as i32, 0xC0, program as i32, 0);
    }

    fn note_on(&self, channel: u8, pitch: u8, velocity: u8) {
        self.synth
            .lock()
            .note_on(channel as i32, pitch as i32, velocity.max(1) as i32);
    }

    fn note_off(&self, channel: u8, pitch: u8) {
        self.synth.lock().note_off(channel as i32, pitch as i32);
    }

    fn control_change(&self, channel: u8, controller: u8, value: u8) {
        self.synth
            .lock()
            .process_midi_message(channel as i32, 0xB0, controller as i32, value as i32);
    }

    fn close(&self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

/// External MIDI output through the first available port.
pub struct MidirSink {
    conn: Mutex<Option<MidiOutputConnection>>,
    port_name: String,
}

impl MidirSink {
    pub fn open() -> Result<Self> {
        let output = MidiOutput::new("afterhours").map_err(|e| anyhow!("midir init: {e}"))?;
        let ports = output.ports();
        let port = ports
            .first()
            .ok_or_else(|| anyhow!("no MIDI output ports found"))?;
        let port_name = output
            .port_name(port)
            .unwrap_or_else(|_| "Unknown Output".to_string());

        let conn = output
            .connect(port, "afterhours-out")
            .map_err(|e| anyhow!("failed to open MIDI port {port_name}: {e}"))?;

        tracing::info!(port = %port_name, "external MIDI output connected");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn send(&self, message: &[u8]) {
        if let Some(conn) = self.conn.lock().as_mut() {
            if let Err(e) = conn.send(message) {
                tracing::warn!(%e, "MIDI send failed");
            }
        }
    }
}

impl MidiSink for MidirSink {
    fn name(&self) -> &'static str {
        "midi"
    }

    fn program_change(&self, channel: u8, program: u8) {
        self.send(&[0xC0 | (channel & 0x0F), program & 0x7F]);
    }

    fn note_on(&self, channel: u8, pitch: u8, velocity: u8) {
        self.send(&[0x90 | (channel & 0x0F), pitch & 0x7F, velocity.clamp(1, 127)]);
    }

    fn note_off(&self, channel: u8, pitch: u8) {
        self.send(&[0x80 | (channel & 0x0F), pitch & 0x7F, 0]);
    }

    fn control_change(&self, channel: u8, controller: u8, value: u8) {
        self.send(&[0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F]);
    }

    fn close(&self) {
        if let Some(conn) = self.conn.lock().take() {
            conn.close();
        }
    }
}
