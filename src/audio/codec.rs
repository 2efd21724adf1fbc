//! PCM16 frame codec
//!
//! Converts between floating-point samples in `[-1.0, 1.0]` and the wire
//! format used in both directions: signed 16-bit little-endian PCM, mono,
//! 16 kHz.
//!
//! The two directions are asymmetric, matching the capture and
//! playback paths of the service:
//! - `encode` scales by 32767 (so `1.0` maps to `i16::MAX`, `-1.0` to `-i16::MAX`)
//! - `decode` divides by 32768 (so `i16::MIN` maps exactly to `-1.0`)

/// Sample rate of every frame exchanged with the service
pub const SAMPLE_RATE: u32 = 16_000;

/// Bytes per PCM16 sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Errors from decoding a PCM16 byte frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// PCM16 frames must contain a whole number of samples
    OddLength(usize),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::OddLength(len) => {
                write!(f, "PCM16 frame has odd byte length {}", len)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Encode float samples as PCM16 little-endian bytes
///
/// Each sample is clamped to `[-1.0, 1.0]`, scaled by 32767 and truncated
/// toward zero. NaN encodes as silence.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    bytes
}

/// Decode PCM16 little-endian bytes into float samples
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Duration in seconds of a PCM16 frame of `byte_len` bytes at 16 kHz
pub fn frame_duration_secs(byte_len: usize) -> f64 {
    (byte_len / BYTES_PER_SAMPLE) as f64 / SAMPLE_RATE as f64
}

fn sample_to_i16(sample: f32) -> i16 {
    // `as` saturates and maps NaN to 0
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_scaling_and_byte_order() {
        let bytes = encode(&[0.0, 1.0, -1.0, 0.5]);
        assert_eq!(bytes.len(), 8);

        assert_eq!(&bytes[0..2], &[0x00, 0x00]);
        // 32767 = 0x7FFF -> [0xFF, 0x7F]
        assert_eq!(&bytes[2..4], &[0xFF, 0x7F]);
        // -32767 = 0x8001 -> [0x01, 0x80]
        assert_eq!(&bytes[4..6], &[0x01, 0x80]);
        // 0.5 * 32767 = 16383.5 truncated to 16383 = 0x3FFF
        assert_eq!(&bytes[6..8], &[0xFF, 0x3F]);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let bytes = encode(&[2.0, -3.5, f32::INFINITY]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, -i16::MAX, i16::MAX]);
    }

    #[test]
    fn test_encode_truncates_toward_zero() {
        // -0.5 * 32767 = -16383.5, truncates to -16383
        let bytes = encode(&[-0.5]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), -16383);
    }

    #[test]
    fn test_encode_nan_is_silence() {
        assert_eq!(encode(&[f32::NAN]), vec![0, 0]);
    }

    #[test]
    fn test_decode_known_values() {
        let samples = decode(&[0x00, 0x80, 0xFF, 0x7F, 0x00, 0x00, 0x00, 0x40]).unwrap();
        assert_eq!(samples[0], -1.0);
        assert_eq!(samples[1], 32767.0 / 32768.0);
        assert_eq!(samples[2], 0.0);
        assert_eq!(samples[3], 0.5);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        assert_eq!(decode(&[1, 2, 3]), Err(CodecError::OddLength(3)));
        assert!(decode(&[7]).is_err());
    }

    #[test]
    fn test_decode_empty_frame() {
        assert_eq!(decode(&[]).unwrap(), Vec::<f32>::new());
        assert!(encode(&[]).is_empty());
    }

    #[test]
    fn test_float_round_trip_within_quantization() {
        let input: Vec<f32> = (0..=2000).map(|i| -1.0 + i as f32 / 1000.0).collect();
        let output = decode(&encode(&input)).unwrap();

        assert_eq!(output.len(), input.len());
        for (x, y) in input.iter().zip(output.iter()) {
            // One truncation step plus the 32767/32768 scale mismatch
            assert!(
                (x - y).abs() < 2.0 / 32768.0,
                "{} decoded as {}",
                x,
                y
            );
        }
    }

    #[test]
    fn test_byte_round_trip_moves_at_most_one_step_toward_zero() {
        let bytes: Vec<u8> = (i16::MIN..=i16::MAX)
            .step_by(7)
            .chain([i16::MIN, i16::MAX, -1, 0, 1])
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let round_tripped = encode(&decode(&bytes).unwrap());
        assert_eq!(round_tripped.len(), bytes.len());

        for (orig, back) in bytes.chunks_exact(2).zip(round_tripped.chunks_exact(2)) {
            let orig = i16::from_le_bytes([orig[0], orig[1]]) as i32;
            let back = i16::from_le_bytes([back[0], back[1]]) as i32;
            assert!((orig - back).abs() <= 1, "{} came back as {}", orig, back);
            assert!(back.abs() <= orig.abs());
        }
    }

    #[test]
    fn test_byte_round_trip_preserves_silence() {
        let bytes = vec![0u8; 640];
        assert_eq!(encode(&decode(&bytes).unwrap()), bytes);
    }

    #[test]
    fn test_frame_duration() {
        // 16000 samples = 32000 bytes = 1s
        assert_eq!(frame_duration_secs(32_000), 1.0);
        assert_eq!(frame_duration_secs(3_200), 0.1);
        assert_eq!(frame_duration_secs(0), 0.0);
    }
}
