use crate::error::{Error, Result};
use log::debug;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::time::Instant;

pub fn create_rng(seed: u64) -> SmallRng {
    if seed == 0 {
        SmallRng::from_entropy()
    } else {
        SmallRng::seed_from_u64(seed)
    }
}

/// Split a bucket's byte run into its fixed-size elements.
/// A remainder means the bucket was corrupted.
pub fn chunk_exact(bytes: &[u8], element_size: usize) -> Result<Vec<&[u8]>> {
    if bytes.len() % element_size != 0 {
        return Err(Error::CorruptBucket {
            len: bytes.len(),
            element_size,
        });
    }
    Ok(bytes.chunks(element_size).collect())
}

/// Logs the elapsed time of a scope at debug level when dropped.
pub(crate) struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(label: &'static str) -> Self {
        Timer {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!("{}: {:?}", self.label, self.start.elapsed());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chunk_exact() {
        let chunks = chunk_exact(&[1, 2, 3, 4, 5, 6], 3).unwrap();
        assert_eq!(chunks, vec![&[1, 2, 3][..], &[4, 5, 6][..]]);
        assert!(chunk_exact(&[1, 2, 3, 4], 3).is_err());
        assert!(chunk_exact(&[], 8).unwrap().is_empty());
    }

    #[test]
    fn test_create_rng_deterministic() {
        use rand::Rng;
        let a: u64 = create_rng(12).gen();
        let b: u64 = create_rng(12).gen();
        assert_eq!(a, b);
    }
}
