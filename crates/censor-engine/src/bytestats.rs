//! Byte distribution statistics
//!
//! Pure functions over a payload. Empty input yields 0 for every statistic.

/// Whether a byte is printable ASCII (0x20..=0x7E)
#[inline(always)]
pub const fn is_printable(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7E)
}

/// Mean number of set bits per byte
#[inline]
pub fn average_popcount(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let bits: u64 = data.iter().map(|b| u64::from(b.count_ones())).sum();
    bits as f64 / data.len() as f64
}

/// Number of printable bytes
#[inline]
pub fn printable_count(data: &[u8]) -> usize {
    data.iter().filter(|&&b| is_printable(b)).count()
}

/// Fraction of printable bytes
#[inline]
pub fn printable_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    printable_count(data) as f64 / data.len() as f64
}

/// Length of the longest contiguous run of printable bytes
pub fn longest_printable_run(data: &[u8]) -> usize {
    let mut longest = 0;
    let mut run = 0;

    for &byte in data {
        if is_printable(byte) {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }

    longest
}

/// Shannon entropy of the byte-value histogram, in bits per byte
///
/// Ranges from 0 (constant input) to 8 (uniform over all 256 values).
#[inline]
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0u32; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;

    for &count in &freq {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }

    entropy
}

/// All statistics for one payload, computed in a single call
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ByteStatistics {
    /// Payload length
    pub len: usize,
    /// Mean set bits per byte
    pub average_popcount: f64,
    /// Printable byte count
    pub printable_count: usize,
    /// Printable byte fraction
    pub printable_ratio: f64,
    /// Longest printable run
    pub longest_printable_run: usize,
    /// Shannon entropy (bits per byte)
    pub entropy: f64,
}

impl ByteStatistics {
    /// Compute statistics for `data`
    pub fn compute(data: &[u8]) -> Self {
        Self {
            len: data.len(),
            average_popcount: average_popcount(data),
            printable_count: printable_count(data),
            printable_ratio: printable_ratio(data),
            longest_printable_run: longest_printable_run(data),
            entropy: shannon_entropy(data),
        }
    }
}
