//! Small HyperLogLog sketch for stream cardinality.
//!
//! 2^12 registers ≈ 1.6% standard error, 4 KiB per column. Exact
//! counting is used on samples; this sketch only serves full-stream
//! profiling where holding every distinct value would defeat the
//! memory bound.

use xxhash_rust::xxh3::xxh3_64;

const P: u32 = 12;
const M: usize = 1 << P;

#[derive(Debug, Clone)]
pub struct HyperLogLog {
    registers: Vec<u8>,
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperLogLog {
    pub fn new() -> Self {
        Self {
            registers: vec![0u8; M],
        }
    }

    pub fn insert(&mut self, value: &str) {
        let hash = xxh3_64(value.as_bytes());
        let idx = (hash >> (64 - P)) as usize;
        let rank = ((hash << P) | (1 << (P - 1))).leading_zeros() as u8 + 1;
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    pub fn estimate(&self) -> u64 {
        let m = M as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-(r as i32)))
            .sum();
        let raw = alpha * m * m / sum;

        if raw <= 2.5 * m {
            let zeros = self.registers.iter().filter(|&&r| r == 0).count();
            if zeros > 0 {
                // Linear counting in the small range.
                return (m * (m / zeros as f64).ln()).round() as u64;
            }
        }
        raw.round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_cardinalities_are_near_exact() {
        let mut hll = HyperLogLog::new();
        for i in 0..100 {
            hll.insert(&format!("v{i}"));
        }
        let est = hll.estimate();
        assert!((90..=110).contains(&est), "estimate {est} for 100");
    }

    #[test]
    fn large_cardinalities_stay_within_a_few_percent() {
        let mut hll = HyperLogLog::new();
        for i in 0..100_000 {
            hll.insert(&format!("value-{i}"));
        }
        let est = hll.estimate() as f64;
        let err = (est - 100_000.0).abs() / 100_000.0;
        assert!(err < 0.05, "relative error {err}");
    }

    #[test]
    fn duplicates_do_not_inflate() {
        let mut hll = HyperLogLog::new();
        for _ in 0..10_000 {
            hll.insert("same");
        }
        assert!(hll.estimate() <= 2);
    }
}
