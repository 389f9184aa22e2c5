//! PCM16 sample conversion
//!
//! Capture audio is float in `[-1, 1]` and leaves the core as signed 16-bit
//! little-endian PCM. Playback audio arrives as PCM16 and is turned back into
//! float for the output device.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Scale factor for non-negative samples
const POSITIVE_SCALE: f32 = 32767.0;

/// Scale factor for negative samples
const NEGATIVE_SCALE: f32 = 32768.0;

/// Divisor used when turning PCM16 back into float
const DECODE_SCALE: f32 = 32768.0;

/// Encode float capture samples into PCM16 little-endian bytes.
///
/// Each sample is clamped to `[-1, 1]` first. Non-negative samples are
/// multiplied by 32767 and negative ones by 32768 so neither end overflows.
pub fn encode_capture(samples: &[f32]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.put_i16_le(float_to_i16(sample));
    }
    out.freeze()
}

/// Convert one float sample to a PCM16 value
#[inline]
pub fn float_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * NEGATIVE_SCALE) as i16
    } else {
        (s * POSITIVE_SCALE) as i16
    }
}

/// Decode PCM16 little-endian bytes into float samples.
pub fn decode_playback(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    Ok(pcm_bytes_to_samples(bytes)?
        .into_iter()
        .map(|v| v as f32 / DECODE_SCALE)
        .collect())
}

/// Interpret PCM16 little-endian bytes as samples
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Result<Vec<i16>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddByteLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Serialize samples as PCM16 little-endian bytes
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.put_i16_le(sample);
    }
    out.freeze()
}

/// Apply a linear fade-in over the first `fade_len` samples and a linear
/// fade-out over the last `fade_len` samples.
///
/// The fade length is clipped to half the buffer so the two ramps never
/// overlap on short frames.
pub fn apply_edge_fades(samples: &mut [f32], fade_len: usize) {
    let len = samples.len();
    let n = fade_len.min(len / 2);
    if n == 0 {
        return;
    }
    for i in 0..n {
        let gain = i as f32 / n as f32;
        samples[i] *= gain;
        samples[len - 1 - i] *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_scales_asymmetrically() {
        let bytes = encode_capture(&[1.0, -1.0, 0.0, 0.5, -0.5]);
        let samples = pcm_bytes_to_samples(&bytes).unwrap();
        assert_eq!(samples, vec![32767, -32768, 0, 16383, -16384]);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let bytes = encode_capture(&[2.0, -3.5, f32::INFINITY, f32::NEG_INFINITY]);
        let samples = pcm_bytes_to_samples(&bytes).unwrap();
        assert_eq!(samples, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_encode_is_little_endian() {
        let bytes = encode_capture(&[-1.0]);
        assert_eq!(&bytes[..], &[0x00, 0x80]);
    }

    #[test]
    fn test_decode_known_values() {
        let decoded = decode_playback(&[0x00, 0x40, 0x00, 0x80]).unwrap();
        assert_eq!(decoded, vec![0.5, -1.0]);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        assert_eq!(
            decode_playback(&[0x01, 0x02, 0x03]),
            Err(CodecError::OddByteLength(3))
        );
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode_playback(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_edge_fades() {
        let mut samples = vec![1.0f32; 256];
        apply_edge_fades(&mut samples, 64);

        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[255], 0.0);
        assert!((samples[32] - 0.5).abs() < 1e-6);
        assert!((samples[255 - 32] - 0.5).abs() < 1e-6);
        assert_eq!(samples[64], 1.0);
        assert_eq!(samples[191], 1.0);
    }

    #[test]
    fn test_edge_fades_short_frame() {
        let mut samples = vec![1.0f32; 10];
        apply_edge_fades(&mut samples, 64);
        // Ramps shrink to five samples each
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[9], 0.0);
        assert!((samples[4] - 0.8).abs() < 1e-6);

        let mut single = vec![1.0f32];
        apply_edge_fades(&mut single, 64);
        assert_eq!(single, vec![1.0]);
    }

    proptest! {
        #[test]
        fn prop_pcm_round_trip_within_one_lsb(samples in proptest::collection::vec(any::<i16>(), 0..512)) {
            let normalized: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
            let decoded = decode_playback(&encode_capture(&normalized)).unwrap();
            prop_assert_eq!(decoded.len(), samples.len());
            for (original, back) in samples.iter().zip(decoded.iter()) {
                let diff = (*original as f32 - back * 32768.0).abs();
                prop_assert!(diff <= 1.0 + 1e-3, "{} decoded as {}", original, back * 32768.0);
            }
        }

        #[test]
        fn prop_encoded_length_is_two_bytes_per_sample(samples in proptest::collection::vec(-2.0f32..2.0, 0..512)) {
            prop_assert_eq!(encode_capture(&samples).len(), samples.len() * 2);
        }
    }
}
