//! Byte-level entropy analysis.

/// Window size used for the windowed entropy variance.
pub const ENTROPY_WINDOW: usize = 256;

/// Shannon entropy of a byte buffer, in bits per byte (0.0..=8.0).
///
/// An empty buffer has entropy 0.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut freq = [0u64; 256];
    for &b in data {
        freq[b as usize] += 1;
    }
    let n = data.len() as f64;
    let h: f64 = freq
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum();
    // a single symbol sums to -0.0
    h.abs()
}

/// Population variance of per-window entropy over non-overlapping windows.
///
/// A trailing partial window is ignored.
/// Fewer than two windows yields 0.
pub fn windowed_entropy_variance(data: &[u8], window: usize) -> f64 {
    if window == 0 || data.len() < window * 2 {
        return 0.0;
    }
    let values: Vec<f64> = data.chunks_exact(window).map(shannon_entropy).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Entropy summary of one buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntropyProfile {
    /// Whole-buffer Shannon entropy, bits per byte.
    pub entropy: f64,
    /// Variance of entropy across fixed-size windows.
    pub variance: f64,
}

impl EntropyProfile {
    /// Analyze a buffer using [`ENTROPY_WINDOW`]-byte windows.
    pub fn analyze(data: &[u8]) -> Self {
        Self {
            entropy: shannon_entropy(data),
            variance: windowed_entropy_variance(data, ENTROPY_WINDOW),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_bytes_have_zero_entropy() {
        assert_eq!(shannon_entropy(&[0x41; 1000]), 0.0);
        assert_eq!(shannon_entropy(&[]), 0.0);
    }

    #[test]
    fn test_all_byte_values_have_eight_bits() {
        let data: Vec<u8> = (0..=255u8).collect();
        assert!((shannon_entropy(&data) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_two_symbols_one_bit() {
        let data = [0u8, 1, 0, 1, 0, 1, 0, 1];
        assert!((shannon_entropy(&data) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_variance_zero_for_homogeneous_data() {
        let data: Vec<u8> = (0..=255u8).cycle().take(ENTROPY_WINDOW * 4).collect();
        assert_eq!(windowed_entropy_variance(&data, ENTROPY_WINDOW), 0.0);
    }

    #[test]
    fn test_variance_positive_for_mixed_regions() {
        let mut data = vec![0u8; ENTROPY_WINDOW];
        data.extend((0..=255u8).cycle().take(ENTROPY_WINDOW));
        // windows: 0.0 and 8.0 bits
        let v = windowed_entropy_variance(&data, ENTROPY_WINDOW);
        assert!((v - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_variance_needs_two_windows() {
        assert_eq!(windowed_entropy_variance(&[1, 2, 3], ENTROPY_WINDOW), 0.0);
        assert_eq!(windowed_entropy_variance(&[1, 2, 3], 0), 0.0);
    }
}
