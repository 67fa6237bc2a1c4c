//! Pure PCM16 little-endian mono audio utilities (§4.A).
//!
//! Grounded on the original platform's `core/audio.py`: RMS, a cheap
//! integer-mean decimator for downsampling, and RIFF/WAVE PCM16 read/write.

use std::io::{Cursor, Read};

/// Root-mean-square of a PCM16 LE mono buffer. Empty or sub-sample-width
/// inputs yield 0, matching the original's guard on `len(pcm_data) < 2`.
pub fn rms(frame: &[u8]) -> f64 {
    if frame.len() < 2 {
        return 0.0;
    }
    let samples: Vec<i32> = frame
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32)
        .collect();
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Decimate PCM16 LE mono audio from `from_rate` to `to_rate`.
///
/// Identity when the rates match or don't divide evenly favorably
/// (`ratio < 1`). Otherwise each output sample is the integer mean of
/// `ratio` consecutive input samples, saturated to `i16` range. This is a
/// cheap decimator, not a proper low-pass filter — good enough for
/// 48 kHz -> 8 kHz telephony playback, not audio-grade resampling.
pub fn downsample(src: &[u8], from_rate: u32, to_rate: u32) -> Vec<u8> {
    if from_rate == to_rate {
        return src.to_vec();
    }
    let ratio = (from_rate / to_rate) as usize;
    if ratio < 1 {
        return src.to_vec();
    }

    let samples: Vec<i32> = src
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32)
        .collect();

    let mut out = Vec::with_capacity((samples.len() / ratio) * 2);
    for group in samples.chunks(ratio) {
        if group.len() < ratio {
            break;
        }
        let mean = group.iter().sum::<i32>().div_euclid(ratio as i32);
        let clamped = mean.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

/// Build a standard RIFF/WAVE PCM16 mono container around raw samples.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let byte_rate = sample_rate * CHANNELS as u32 * (BITS_PER_SAMPLE as u32 / 8);
    let block_align = CHANNELS * (BITS_PER_SAMPLE / 8);
    let data_len = pcm.len() as u32;

    let mut out = Vec::with_capacity(44 + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Parsed contents of a mono PCM16 WAV file.
pub struct WavFile {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

/// Parse a RIFF/WAVE PCM16 mono buffer back into raw samples and rate.
pub fn wav_from_bytes(bytes: &[u8]) -> anyhow::Result<WavFile> {
    let mut cursor = Cursor::new(bytes);
    let mut riff_tag = [0u8; 4];
    cursor.read_exact(&mut riff_tag)?;
    anyhow::ensure!(&riff_tag == b"RIFF", "not a RIFF file");
    let mut skip4 = [0u8; 4];
    cursor.read_exact(&mut skip4)?; // chunk size, unused
    let mut wave_tag = [0u8; 4];
    cursor.read_exact(&mut wave_tag)?;
    anyhow::ensure!(&wave_tag == b"WAVE", "not a WAVE file");

    let mut sample_rate = 8000u32;
    let mut pcm = Vec::new();

    loop {
        let mut chunk_id = [0u8; 4];
        if cursor.read_exact(&mut chunk_id).is_err() {
            break;
        }
        let mut len_buf = [0u8; 4];
        cursor.read_exact(&mut len_buf)?;
        let chunk_len = u32::from_le_bytes(len_buf) as usize;

        let mut chunk_data = vec![0u8; chunk_len];
        cursor.read_exact(&mut chunk_data)?;

        match &chunk_id {
            b"fmt " => {
                anyhow::ensure!(chunk_data.len() >= 16, "fmt chunk too short");
                sample_rate = u32::from_le_bytes([
                    chunk_data[4],
                    chunk_data[5],
                    chunk_data[6],
                    chunk_data[7],
                ]);
            }
            b"data" => {
                pcm = chunk_data;
            }
            _ => {}
        }

        // Chunks are word-aligned; skip the pad byte on odd-length chunks.
        if chunk_len % 2 == 1 {
            let mut pad = [0u8; 1];
            let _ = cursor.read_exact(&mut pad);
        }
    }

    Ok(WavFile { pcm, sample_rate })
}

/// Load a WAV file from disk into raw PCM16 mono samples and its sample rate.
pub async fn load_wav(path: &std::path::Path) -> anyhow::Result<WavFile> {
    let bytes = tokio::fs::read(path).await?;
    wav_from_bytes(&bytes)
}

/// Write raw PCM16 mono samples to disk as a WAV file.
pub async fn save_wav(path: &std::path::Path, pcm: &[u8], sample_rate: u32) -> anyhow::Result<()> {
    let wav = pcm_to_wav(pcm, sample_rate);
    tokio::fs::write(path, wav).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_empty_is_zero() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0u8]), 0.0);
    }

    #[test]
    fn rms_is_nonnegative() {
        let frame: Vec<u8> = (0..640u16)
            .flat_map(|i| ((i as i16) - 320).to_le_bytes())
            .collect();
        assert!(rms(&frame) >= 0.0);
    }

    #[test]
    fn rms_of_constant_tone() {
        let sample: i16 = 1000;
        let frame: Vec<u8> = std::iter::repeat(sample.to_le_bytes())
            .take(100)
            .flatten()
            .collect();
        assert!((rms(&frame) - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn downsample_identity_when_rates_equal() {
        let src = vec![1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(downsample(&src, 8000, 8000), src);
    }

    #[test]
    fn downsample_halves_sample_count() {
        let samples: Vec<i16> = vec![100, 200, 300, 400];
        let src: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let out = downsample(&src, 16000, 8000);
        assert_eq!(out.len(), 4); // 2 output samples * 2 bytes
        let out_samples: Vec<i16> = out
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(out_samples, vec![150, 350]);
    }

    #[test]
    fn downsample_uses_floor_division_for_negative_means() {
        // -1 and -2 sum to -3, which does not divide evenly by 2: floor
        // division gives -2, truncating division would give -1.
        let samples: Vec<i16> = vec![-1, -2];
        let src: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let out = downsample(&src, 16000, 8000);
        let out_sample = i16::from_le_bytes([out[0], out[1]]);
        assert_eq!(out_sample, -2);
    }

    #[test]
    fn downsample_saturates() {
        let samples: Vec<i16> = vec![i16::MAX, i16::MAX];
        let src: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let out = downsample(&src, 16000, 8000);
        let out_samples: Vec<i16> = out
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(out_samples, vec![i16::MAX]);
    }

    #[test]
    fn wav_round_trip_preserves_pcm() {
        let samples: Vec<i16> = vec![1, -1, 1000, -1000, 0, 32767, -32768];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let wav_bytes = pcm_to_wav(&pcm, 8000);
        let parsed = wav_from_bytes(&wav_bytes).unwrap();
        assert_eq!(parsed.pcm, pcm);
        assert_eq!(parsed.sample_rate, 8000);
    }
}
