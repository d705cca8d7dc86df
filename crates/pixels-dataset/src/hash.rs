//! Content hash of a compiled DataSet
//!
//! Bernstein style rolling hash. Only ever compared for equality against
//! the hash a die last acknowledged; it is not an integrity check.

const SEED: u32 = 5381;

pub fn dataset_hash(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(SEED, |h, &b| h.wrapping_mul(33) ^ b as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_seed() {
        assert_eq!(dataset_hash(&[]), 5381);
    }

    #[test]
    fn test_known_values() {
        assert_eq!(dataset_hash(&[0]), 5381 * 33);
        assert_eq!(dataset_hash(&[1, 2]), ((5381 * 33) ^ 1) * 33 ^ 2);
    }

    #[test]
    fn test_is_pure() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(dataset_hash(&bytes), dataset_hash(&bytes));
        assert_ne!(dataset_hash(&bytes), dataset_hash(&bytes[1..]));
    }
}
