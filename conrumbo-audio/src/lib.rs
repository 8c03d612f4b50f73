pub mod playback;
pub mod recorder;
pub mod resample;
pub mod wav;

pub use playback::{AudioPlayer, PlaybackError, PlaybackTicket, beep_samples};
pub use recorder::{AudioCaptureError, AudioRecorder, CapturedAudio};
pub use wav::encode_wav_mono_f32le;
