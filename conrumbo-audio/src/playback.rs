//
// Rodio-based output: spoken instructions (decoded wav/mp3 from the backend)
// plus the short start/stop cues.
//
// `OutputStream` is not `Send`, so a dedicated worker thread owns it and the
// rest of the app talks to it over channels, same shape as the recorder.

use std::io::Cursor;
use std::sync::mpsc;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};

pub const BEEP_START_HZ: f32 = 880.0;
pub const BEEP_STOP_HZ: f32 = 440.0;
pub const BEEP_DURATION_MS: u64 = 120;
const BEEP_SAMPLE_RATE_HZ: u32 = 44_100;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio output worker failed: {0}")]
    Worker(String),

    #[error("audio output startup timeout")]
    WorkerTimeout,

    #[error("failed to play clip: {0}")]
    Clip(String),

    #[error("playback wait timed out")]
    WaitTimeout,

    #[error("internal channel error")]
    Channel,
}

pub struct AudioPlayer {
    cmd_tx: mpsc::Sender<Cmd>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
}

/// Handed out by [`AudioPlayer::begin_encoded`]; lets the caller block until
/// the clip drains (or gets stopped) without holding the player.
pub struct PlaybackTicket {
    done_rx: mpsc::Receiver<Result<(), String>>,
}

impl PlaybackTicket {
    pub fn wait(self, timeout: Duration) -> Result<(), PlaybackError> {
        match self.done_rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(msg)) => Err(PlaybackError::Clip(msg)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(PlaybackError::WaitTimeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(PlaybackError::Channel),
        }
    }
}

enum Cmd {
    PlayEncoded {
        bytes: Vec<u8>,
        done: mpsc::Sender<Result<(), String>>,
    },
    Beep {
        freq_hz: f32,
    },
    Ping {
        ack: mpsc::Sender<()>,
    },
    Stop,
    Shutdown,
}

enum WorkerMsg {
    Ready,
    Error(String),
}

impl AudioPlayer {
    pub fn open() -> Result<Self, PlaybackError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Cmd>();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();

        let worker_handle = std::thread::spawn(move || {
            let (_stream, handle) = match OutputStream::try_default() {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = worker_tx.send(WorkerMsg::Error(format!("open output: {e}")));
                    log::error!("Audio output open failed: {e}");
                    return;
                }
            };

            let _ = worker_tx.send(WorkerMsg::Ready);

            run_player(handle, cmd_rx);
        });

        match worker_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Error(e)) => return Err(PlaybackError::Worker(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(PlaybackError::WorkerTimeout),
            Err(_) => return Err(PlaybackError::Channel),
        }

        Ok(Self {
            cmd_tx,
            worker_handle: Some(worker_handle),
        })
    }

    /// Queue an encoded clip (wav or mp3) and return a ticket to wait on.
    /// A new clip supersedes whatever is still playing.
    pub fn begin_encoded(&self, bytes: Vec<u8>) -> Result<PlaybackTicket, PlaybackError> {
        let (done_tx, done_rx) = mpsc::channel();
        self.cmd_tx
            .send(Cmd::PlayEncoded {
                bytes,
                done: done_tx,
            })
            .map_err(|_| PlaybackError::Channel)?;
        Ok(PlaybackTicket { done_rx })
    }

    /// Short sine cue, fire and forget. Failures only get logged; a missing
    /// beep must never take down the interaction.
    pub fn beep(&self, freq_hz: f32) {
        let _ = self.cmd_tx.send(Cmd::Beep { freq_hz });
    }

    /// Stop the active clip immediately. Pending waiters resolve as finished.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Cmd::Stop);
    }

    /// Round trip to the worker; proves the output side is alive without
    /// making a sound.
    pub fn ping(&self, timeout: Duration) -> Result<(), PlaybackError> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.cmd_tx
            .send(Cmd::Ping { ack: ack_tx })
            .map_err(|_| PlaybackError::Channel)?;
        ack_rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => PlaybackError::WaitTimeout,
            mpsc::RecvTimeoutError::Disconnected => PlaybackError::Channel,
        })
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Cmd::Shutdown);
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
    }
}

fn run_player(handle: OutputStreamHandle, cmd_rx: mpsc::Receiver<Cmd>) {
    let mut current: Option<(Sink, mpsc::Sender<Result<(), String>>)> = None;

    loop {
        if let Some((sink, _)) = current.as_ref() {
            if sink.empty() {
                if let Some((_, done)) = current.take() {
                    let _ = done.send(Ok(()));
                }
            }
        }

        match cmd_rx.recv_timeout(Duration::from_millis(25)) {
            Ok(Cmd::PlayEncoded { bytes, done }) => {
                if let Some((sink, old_done)) = current.take() {
                    sink.stop();
                    let _ = old_done.send(Ok(()));
                }
                match start_clip(&handle, bytes) {
                    Ok(sink) => current = Some((sink, done)),
                    Err(msg) => {
                        log::warn!("Playback failed: {msg}");
                        let _ = done.send(Err(msg));
                    }
                }
            }
            Ok(Cmd::Beep { freq_hz }) => match Sink::try_new(&handle) {
                Ok(sink) => {
                    let samples =
                        beep_samples(freq_hz, BEEP_DURATION_MS, BEEP_SAMPLE_RATE_HZ);
                    sink.append(SamplesBuffer::new(1, BEEP_SAMPLE_RATE_HZ, samples));
                    sink.detach();
                }
                Err(e) => log::debug!("Beep skipped: {e}"),
            },
            Ok(Cmd::Ping { ack }) => {
                let _ = ack.send(());
            }
            Ok(Cmd::Stop) => {
                if let Some((sink, done)) = current.take() {
                    sink.stop();
                    let _ = done.send(Ok(()));
                }
            }
            Ok(Cmd::Shutdown) => return,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn start_clip(handle: &OutputStreamHandle, bytes: Vec<u8>) -> Result<Sink, String> {
    let decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| format!("decode audio: {e}"))?;
    let sink = Sink::try_new(handle).map_err(|e| format!("open sink: {e}"))?;
    sink.append(decoder);
    Ok(sink)
}

/// Sine cue with the UI's exponential fade: starts at 0.2 and decays to
/// near-silence across the clip.
pub fn beep_samples(freq_hz: f32, duration_ms: u64, sample_rate_hz: u32) -> Vec<f32> {
    let total = (sample_rate_hz as u64 * duration_ms / 1000) as usize;
    let duration_s = duration_ms as f32 / 1000.0;

    (0..total)
        .map(|i| {
            let t = i as f32 / sample_rate_hz as f32;
            let envelope = 0.2 * (0.0005_f32).powf(t / duration_s);
            envelope * (2.0 * std::f32::consts::PI * freq_hz * t).sin()
        })
        .collect()
}
