//! Bounded, restartable sampling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tally_core::config::SamplingPolicy;
use tally_core::errors::ReadError;

use super::detect::FileProfile;
use super::stream::RowStream;
use super::Row;

/// Read a bounded sample of rows.
///
/// `Head` takes the first `n` rows; `Uniform` reservoir-samples `n`
/// rows from the whole file with a seeded RNG, so the same seed always
/// yields the same rows. Sampled rows keep their file order.
pub fn sample_rows(
    profile: &FileProfile,
    n: usize,
    policy: SamplingPolicy,
    seed: u64,
) -> Result<Vec<Row>, ReadError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let stream = RowStream::open(profile)?;
    match policy {
        SamplingPolicy::Head => {
            let mut rows = Vec::with_capacity(n);
            for row in stream {
                rows.push(row?);
                if rows.len() == n {
                    break;
                }
            }
            Ok(rows)
        }
        SamplingPolicy::Uniform => {
            let mut rng = StdRng::seed_from_u64(seed);
            // Reservoir entries carry their row index so the sample can
            // be restored to file order at the end.
            let mut reservoir: Vec<(u64, Row)> = Vec::with_capacity(n);
            let mut seen = 0u64;
            for row in stream {
                let row = row?;
                if reservoir.len() < n {
                    reservoir.push((seen, row));
                } else {
                    let j = rng.gen_range(0..=seen);
                    if (j as usize) < n {
                        reservoir[j as usize] = (seen, row);
                    }
                }
                seen += 1;
            }
            reservoir.sort_by_key(|(idx, _)| *idx);
            Ok(reservoir.into_iter().map(|(_, row)| row).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn profile_for(rows: usize) -> (tempfile::TempDir, FileProfile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "id,name").unwrap();
        for i in 0..rows {
            writeln!(f, "{i},n{i}").unwrap();
        }
        let p = FileProfile::detect(&path).unwrap();
        (dir, p)
    }

    #[test]
    fn head_takes_first_n() {
        let (_d, p) = profile_for(10);
        let rows = sample_rows(&p, 3, SamplingPolicy::Head, 0).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], "0");
        assert_eq!(rows[2][0], "2");
    }

    #[test]
    fn uniform_is_restartable_with_same_seed() {
        let (_d, p) = profile_for(100);
        let a = sample_rows(&p, 10, SamplingPolicy::Uniform, 42).unwrap();
        let b = sample_rows(&p, 10, SamplingPolicy::Uniform, 42).unwrap();
        assert_eq!(a, b);
        let c = sample_rows(&p, 10, SamplingPolicy::Uniform, 43).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn uniform_preserves_file_order() {
        let (_d, p) = profile_for(100);
        let rows = sample_rows(&p, 10, SamplingPolicy::Uniform, 7).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r[0].parse().unwrap()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn sample_larger_than_file_returns_all_rows() {
        let (_d, p) = profile_for(5);
        let rows = sample_rows(&p, 50, SamplingPolicy::Uniform, 1).unwrap();
        assert_eq!(rows.len(), 5);
    }
}
