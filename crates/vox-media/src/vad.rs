//! Energy-based voice-activity detector (§4.B).
//!
//! Grounded authoritatively on the original platform's `core/vad.py`:
//! a frame-level RMS-against-threshold state machine that also doubles
//! as a barge-in detector while the bot is speaking.

use crate::audio::rms;

/// Outcome of feeding one frame into the VAD.
#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    SpeechStart,
    Speaking,
    /// Carries the snapshot of the full utterance, trailing silence included.
    SpeechEnd(Vec<u8>),
    Silence,
}

/// Frame-level speech/silence state machine with a separate barge-in mode.
pub struct EnergyVad {
    energy_threshold: f64,
    min_speech_frames: u32,
    silence_frames: u32,
    enabled: bool,

    is_speaking: bool,
    speech_count: u32,
    silence_count: u32,
    buffer: Vec<u8>,
}

impl EnergyVad {
    pub fn new(energy_threshold: f64, min_speech_frames: u32, silence_frames: u32, enabled: bool) -> Self {
        EnergyVad {
            energy_threshold,
            min_speech_frames,
            silence_frames,
            enabled,
            is_speaking: false,
            speech_count: 0,
            silence_count: 0,
            buffer: Vec::new(),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Feed one frame. Transitions per §4.B:
    /// IDLE + energetic -> accumulate toward `speech_start`;
    /// SPEAKING + energetic -> `speaking`;
    /// SPEAKING + quiet -> accumulate toward `speech_end`;
    /// IDLE + quiet -> `silence`.
    pub fn feed(&mut self, frame: &[u8]) -> VadEvent {
        let energetic = rms(frame) > self.energy_threshold;

        if !self.is_speaking {
            if energetic {
                self.speech_count += 1;
                self.silence_count = 0;
                if self.speech_count >= self.min_speech_frames {
                    self.is_speaking = true;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(frame);
                    return VadEvent::SpeechStart;
                }
                VadEvent::Silence
            } else {
                self.speech_count = 0;
                VadEvent::Silence
            }
        } else if energetic {
            self.buffer.extend_from_slice(frame);
            VadEvent::Speaking
        } else {
            self.silence_count += 1;
            self.buffer.extend_from_slice(frame);
            if self.silence_count >= self.silence_frames {
                let snapshot = std::mem::take(&mut self.buffer);
                self.reset();
                VadEvent::SpeechEnd(snapshot)
            } else {
                VadEvent::Speaking
            }
        }
    }

    /// Reset all counters and state back to IDLE; invoked after emitting
    /// `speech_end` or explicitly by the caller.
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.speech_count = 0;
        self.silence_count = 0;
        self.buffer.clear();
    }

    /// Barge-in detector used while the bot is playing. Reuses `speech_count`
    /// as a consecutive-energetic-frame counter, distinct from the IDLE/SPEAKING
    /// accumulation above — a non-energetic frame resets it to 0.
    pub fn check_barge_in(&mut self, frame: &[u8]) -> bool {
        if !self.enabled {
            return false;
        }
        if rms(frame) > self.energy_threshold {
            self.speech_count += 1;
            self.speech_count >= self.min_speech_frames
        } else {
            self.speech_count = 0;
            false
        }
    }

    /// After a barge-in fires, force the state into SPEAKING seeded with the
    /// triggering frame so the first post-interruption word is not lost.
    pub fn start_listening_after_barge_in(&mut self, frame: &[u8]) {
        self.is_speaking = true;
        self.speech_count = 0;
        self.silence_count = 0;
        self.buffer.clear();
        self.buffer.extend_from_slice(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_frame(amplitude: i16, len: usize) -> Vec<u8> {
        std::iter::repeat(amplitude.to_le_bytes()).take(len).flatten().collect()
    }

    #[test]
    fn idle_quiet_emits_silence() {
        let mut vad = EnergyVad::new(200.0, 5, 25, true);
        let quiet = tone_frame(10, 320);
        assert_eq!(vad.feed(&quiet), VadEvent::Silence);
    }

    #[test]
    fn speech_start_after_min_frames() {
        let mut vad = EnergyVad::new(200.0, 5, 25, true);
        let loud = tone_frame(2000, 320);
        for _ in 0..4 {
            assert_eq!(vad.feed(&loud), VadEvent::Silence);
        }
        assert_eq!(vad.feed(&loud), VadEvent::SpeechStart);
    }

    #[test]
    fn never_two_consecutive_speech_starts() {
        let mut vad = EnergyVad::new(200.0, 5, 3, true);
        let loud = tone_frame(2000, 320);
        let quiet = tone_frame(10, 320);

        for _ in 0..5 {
            vad.feed(&loud);
        }
        let mut saw_speech_end = false;
        for _ in 0..3 {
            if let VadEvent::SpeechEnd(_) = vad.feed(&quiet) {
                saw_speech_end = true;
            }
        }
        assert!(saw_speech_end);

        for _ in 0..4 {
            assert_eq!(vad.feed(&loud), VadEvent::Silence);
        }
        assert_eq!(vad.feed(&loud), VadEvent::SpeechStart);
    }

    #[test]
    fn speech_end_buffer_begins_above_threshold_and_has_min_frames() {
        let mut vad = EnergyVad::new(200.0, 5, 3, true);
        let loud = tone_frame(2000, 320);
        let quiet = tone_frame(10, 320);

        for _ in 0..5 {
            vad.feed(&loud);
        }
        let mut ended = None;
        for _ in 0..3 {
            if let VadEvent::SpeechEnd(buf) = vad.feed(&quiet) {
                ended = Some(buf);
            }
        }
        let buf = ended.expect("expected speech_end");
        let first_frame = &buf[..320];
        assert!(rms(first_frame) > 200.0);
        let energetic_frames = buf.chunks(320).filter(|f| rms(f) > 200.0).count();
        assert!(energetic_frames >= 5);
    }

    #[test]
    fn barge_in_resets_on_quiet_frame() {
        let mut vad = EnergyVad::new(200.0, 3, 25, true);
        let loud = tone_frame(2000, 320);
        let quiet = tone_frame(10, 320);

        assert!(!vad.check_barge_in(&loud));
        assert!(!vad.check_barge_in(&loud));
        assert!(!vad.check_barge_in(&quiet));
        assert!(!vad.check_barge_in(&loud));
        assert!(!vad.check_barge_in(&loud));
        assert!(vad.check_barge_in(&loud));
    }

    #[test]
    fn feed_detects_speech_even_when_barge_in_is_disabled() {
        // `enabled` only gates `check_barge_in`; normal speech detection
        // must keep working with barge-in turned off.
        let mut vad = EnergyVad::new(200.0, 5, 25, false);
        let loud = tone_frame(2000, 320);
        for _ in 0..4 {
            assert_eq!(vad.feed(&loud), VadEvent::Silence);
        }
        assert_eq!(vad.feed(&loud), VadEvent::SpeechStart);
    }

    #[test]
    fn barge_in_disabled_always_false() {
        let mut vad = EnergyVad::new(200.0, 1, 25, false);
        let loud = tone_frame(2000, 320);
        assert!(!vad.check_barge_in(&loud));
        assert!(!vad.check_barge_in(&loud));
    }

    #[test]
    fn start_listening_after_barge_in_seeds_buffer() {
        let mut vad = EnergyVad::new(200.0, 3, 25, true);
        let loud = tone_frame(2000, 320);
        vad.start_listening_after_barge_in(&loud);
        assert!(vad.is_speaking());
        let quiet = tone_frame(10, 320);
        for _ in 0..24 {
            vad.feed(&quiet);
        }
        if let VadEvent::SpeechEnd(buf) = vad.feed(&quiet) {
            assert_eq!(&buf[..320], &loud[..]);
        } else {
            panic!("expected speech_end");
        }
    }
}
