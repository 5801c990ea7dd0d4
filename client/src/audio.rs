//! PCM to WAV conversion for audio payloads returned as base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

pub const WAV_HEADER_LEN: usize = 44;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

#[derive(Debug, Error, PartialEq)]
pub enum AudioError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(String),
    #[error("pcm payload has an odd number of bytes ({0})")]
    OddLength(usize),
}

pub fn base64_to_bytes(payload: &str) -> Result<Vec<u8>, AudioError> {
    STANDARD
        .decode(payload.trim())
        .map_err(|error| AudioError::Base64(error.to_string()))
}

/// Little-endian 16-bit samples.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Result<Vec<i16>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Mono 16-bit WAV with the canonical 44-byte header.
pub fn pcm16_to_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * block_align as u32;
    let data_len = (samples.len() * 2) as u32;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

pub fn base64_pcm_to_wav(payload: &str, sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let samples = pcm_bytes_to_samples(&base64_to_bytes(payload)?)?;
    Ok(pcm16_to_wav(&samples, sample_rate))
}
