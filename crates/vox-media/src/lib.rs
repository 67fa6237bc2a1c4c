//! Audio utilities, energy VAD, and telephony playback (components A, B, D).

pub mod audio;
pub mod playback;
pub mod vad;
