//! Fixed-point PCM <-> normalised float conversion.
//!
//! Little-endian throughout. 8-bit PCM is unsigned with a 128 midpoint,
//! 16- and 32-bit are signed.

/// Decode `bytes` of PCM at `bytes_per_sample` into `out`.
///
/// `out.len()` samples are decoded; `bytes` must hold at least
/// `out.len() * bytes_per_sample` bytes.
pub fn decode_into(bytes: &[u8], bytes_per_sample: usize, out: &mut [f32]) {
    match bytes_per_sample {
        1 => {
            for (dst, &b) in out.iter_mut().zip(bytes) {
                *dst = (b as f32 - 128.0) / 128.0;
            }
        }
        2 => {
            for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                *dst = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32_768.0;
            }
        }
        4 => {
            for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                let v = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                *dst = (v as f64 / 2_147_483_648.0) as f32;
            }
        }
        other => {
            log::error!("unsupported PCM sample width: {} bytes", other);
            out.fill(0.0);
        }
    }
}

/// Encode normalised samples as PCM with `bits_per_sample` bits.
///
/// Clamps out-of-range values.
pub fn encode(samples: &[f32], bits_per_sample: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * (bits_per_sample as usize / 8));
    match bits_per_sample {
        8 => {
            for &sample in samples {
                let v = (sample.clamp(-1.0, 1.0) * 127.0).round() as i16 + 128;
                data.push(v as u8);
            }
        }
        16 => {
            for &sample in samples {
                let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
        32 => {
            for &sample in samples {
                let v = (sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
        other => log::error!("unsupported PCM bit depth: {}", other),
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn decode_16_bit() {
        let mut bytes = Vec::new();
        for v in [0i16, i16::MAX, i16::MIN, 16_384] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let mut out = [0.0f32; 4];
        decode_into(&bytes, 2, &mut out);

        assert_eq!(out[0], 0.0);
        assert_abs_diff_eq!(out[1], 1.0, epsilon = 1e-4);
        assert_eq!(out[2], -1.0);
        assert_abs_diff_eq!(out[3], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn decode_8_bit_midpoint_is_silence() {
        let mut out = [1.0f32; 3];
        decode_into(&[128, 0, 255], 1, &mut out);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], -1.0);
        assert_abs_diff_eq!(out[2], 1.0, epsilon = 0.01);
    }

    #[test]
    fn decode_32_bit() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(i32::MIN / 2).to_le_bytes());
        let mut out = [0.0f32; 1];
        decode_into(&bytes, 4, &mut out);
        assert_abs_diff_eq!(out[0], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn encode_clamps_and_sizes() {
        let pcm = encode(&[2.0, -3.0], 16);
        assert_eq!(pcm.len(), 4);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), -i16::MAX);

        assert_eq!(encode(&[0.0], 8), vec![128]);
        assert_eq!(encode(&[0.0, 0.0], 32).len(), 8);
    }

    #[test]
    fn encode_then_decode_is_close() {
        let samples = [0.25f32, -0.75];
        let pcm = encode(&samples, 16);
        let mut out = [0.0f32; 2];
        decode_into(&pcm, 2, &mut out);
        assert_abs_diff_eq!(out[0], 0.25, epsilon = 1e-3);
        assert_abs_diff_eq!(out[1], -0.75, epsilon = 1e-3);
    }
}
