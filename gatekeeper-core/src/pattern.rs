//! Null-byte flooding and short-cycle padding detection.

/// Null-byte share above which a buffer is flagged.
pub const NULL_RATIO_LIMIT: f64 = 0.2;

/// Single-byte share above which a buffer is flagged.
pub const DOMINANT_BYTE_LIMIT: f64 = 0.7;

/// Share of sampled chunks that may be short-cycle periodic before flagging.
pub const PERIODIC_CHUNK_LIMIT: f64 = 0.5;

/// Longest cycle length treated as padding.
pub const MAX_CYCLE: usize = 4;

const SAMPLE_PREFIX: usize = 4096;
const CHUNK: usize = 32;

/// A pattern finding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PatternFinding {
    /// Too many zero bytes.
    NullFlood {
        /// Share of zero bytes in the buffer.
        ratio: f64,
    },
    /// One byte value dominates the buffer.
    DominantByte {
        /// The dominating value.
        value: u8,
        /// Its share of the buffer.
        ratio: f64,
    },
    /// Most sampled chunks repeat a 1..=4 byte cycle.
    ShortCycle {
        /// Share of periodic chunks in the sampled prefix.
        fraction: f64,
    },
}

impl PatternFinding {
    /// Human-readable issue text.
    pub fn describe(&self) -> String {
        match self {
            Self::NullFlood { ratio } => {
                format!("null-byte flooding: {:.1}% of bytes are 0x00", ratio * 100.0)
            }
            Self::DominantByte { value, ratio } => format!(
                "repeated-byte padding: 0x{:02x} covers {:.1}% of the buffer",
                value,
                ratio * 100.0
            ),
            Self::ShortCycle { fraction } => format!(
                "short-cycle repetition in {:.1}% of sampled chunks",
                fraction * 100.0
            ),
        }
    }
}

/// Run all pattern checks. Findings come out in a fixed order.
pub fn detect(data: &[u8]) -> Vec<PatternFinding> {
    let mut findings = Vec::new();
    if data.is_empty() {
        return findings;
    }

    let mut freq = [0usize; 256];
    for &b in data {
        freq[b as usize] += 1;
    }
    let n = data.len() as f64;

    let null_ratio = freq[0] as f64 / n;
    if null_ratio > NULL_RATIO_LIMIT {
        findings.push(PatternFinding::NullFlood { ratio: null_ratio });
    }

    // max_by_key keeps the last maximum; scan in reverse so ties pick the lowest value
    if let Some((value, &count)) = freq.iter().enumerate().rev().max_by_key(|&(_, c)| *c) {
        let ratio = count as f64 / n;
        if ratio > DOMINANT_BYTE_LIMIT {
            findings.push(PatternFinding::DominantByte {
                value: value as u8,
                ratio,
            });
        }
    }

    if let Some(fraction) = periodic_fraction(data) {
        if fraction > PERIODIC_CHUNK_LIMIT {
            findings.push(PatternFinding::ShortCycle { fraction });
        }
    }

    findings
}

/// Share of full chunks in the sampled prefix that repeat a short cycle.
///
/// `None` when the prefix holds fewer than two full chunks.
pub fn periodic_fraction(data: &[u8]) -> Option<f64> {
    let sample = &data[..data.len().min(SAMPLE_PREFIX)];
    let chunks: Vec<&[u8]> = sample.chunks_exact(CHUNK).collect();
    if chunks.len() < 2 {
        return None;
    }
    let periodic = chunks.iter().filter(|c| has_short_cycle(c)).count();
    Some(periodic as f64 / chunks.len() as f64)
}

fn has_short_cycle(chunk: &[u8]) -> bool {
    (1..=MAX_CYCLE).any(|p| chunk.iter().skip(p).zip(chunk.iter()).all(|(a, b)| a == b))
}
