//! G.711 μ-law (PCMU) codec for the peer media tracks.
//!
//! The realtime API exchanges 24 kHz PCM16; PCMU runs at 8 kHz, so encoding
//! averages every three input samples and decoding holds each sample for three
//! output frames.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::realtime::REALTIME_SAMPLE_RATE;

/// Clock rate of PCMU.
pub const PCMU_SAMPLE_RATE: u32 = 8_000;

/// Realtime samples per PCMU sample.
const RATIO: usize = (REALTIME_SAMPLE_RATE / PCMU_SAMPLE_RATE) as usize;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Encode one linear sample.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;

    !(sign | (exponent << 4) | mantissa) as u8
}

/// Decode one μ-law byte.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = (byte & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;

    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode 24 kHz PCM16 little-endian audio as 8 kHz PCMU.
///
/// A trailing odd byte is ignored.
pub fn encode_pcmu(pcm: &[u8]) -> Bytes {
    let samples: Vec<i32> = pcm
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32)
        .collect();

    samples
        .chunks(RATIO)
        .map(|group| {
            let mean = group.iter().sum::<i32>() / group.len() as i32;
            linear_to_ulaw(mean as i16)
        })
        .collect::<Vec<u8>>()
        .into()
}

/// Decode 8 kHz PCMU into 24 kHz PCM16 little-endian audio.
pub fn decode_pcmu(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() * RATIO * 2);
    for &byte in payload {
        let sample = ulaw_to_linear(byte);
        for _ in 0..RATIO {
            out.put_i16_le(sample);
        }
    }
    out.freeze()
}
