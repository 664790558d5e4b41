//! PCM to WAV wrapping for synthesized speech.

use crate::client::SpeechAudio;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

pub const WAV_HEADER_LEN: usize = 44;
/// Highest sample rate accepted from a provider.
pub const MAX_SAMPLE_RATE: u32 = 192_000;

#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("sample rate {0} Hz is outside 1..={MAX_SAMPLE_RATE}")]
    SampleRate(u32),
    #[error("PCM16 payload has an odd length of {0} bytes")]
    OddLength(usize),
    #[error("failed to write WAV: {0}")]
    Write(#[from] hound::Error),
}

pub fn is_supported_sample_rate(rate: u32) -> bool {
    (1..=MAX_SAMPLE_RATE).contains(&rate)
}

/// Wraps little-endian mono 16-bit PCM in a RIFF/WAVE container.
pub fn wrap_pcm16_mono_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, WavError> {
    if !is_supported_sample_rate(sample_rate) {
        return Err(WavError::SampleRate(sample_rate));
    }
    if pcm.len() % 2 != 0 {
        return Err(WavError::OddLength(pcm.len()));
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + pcm.len()));
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for pair in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

impl SpeechAudio {
    pub fn to_wav(&self) -> Result<Vec<u8>, WavError> {
        wrap_pcm16_mono_wav(&self.pcm, self.sample_rate)
    }
}
