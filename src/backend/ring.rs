//! Ketama-style consistent hashing over weighted servers.
//!
//! Each server gets `160 * weight / mean_weight` points on a 32-bit circle,
//! four per MD5 digest of `"{address}-{n}"`. A key is owned by the first
//! point at or after the first four bytes of its own MD5.

use crate::servers::ServerSpec;
use md5::{Digest, Md5};

const POINTS_PER_SERVER: u64 = 160;

#[derive(Clone, Debug, Default)]
pub struct HashRing {
    /// Sorted `(point, server index)` pairs.
    points: Vec<(u32, usize)>,
}

fn point(digest: &[u8], slot: usize) -> u32 {
    let i = slot * 4;
    u32::from_le_bytes([digest[i], digest[i + 1], digest[i + 2], digest[i + 3]])
}

impl HashRing {
    /// Build a ring; a weight of zero counts as one.
    pub fn new(servers: &[ServerSpec]) -> Self {
        if servers.is_empty() {
            return HashRing::default();
        }

        let weights: Vec<u64> = servers.iter().map(|s| u64::from(s.weight.max(1))).collect();
        let total: u64 = weights.iter().sum();
        let count = servers.len() as u64;

        let mut points = Vec::new();
        for (index, (server, weight)) in servers.iter().zip(&weights).enumerate() {
            let share = (POINTS_PER_SERVER * weight * count / total).max(4);
            let address = server.address();
            for n in 0..share / 4 {
                let digest = Md5::digest(format!("{}-{}", address, n).as_bytes());
                for slot in 0..4 {
                    points.push((point(&digest, slot), index));
                }
            }
        }
        points.sort_unstable();
        HashRing { points }
    }

    /// Index of the server owning `key`.
    pub fn locate(&self, key: &str) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let hash = point(&Md5::digest(key.as_bytes()), 0);
        let at = self.points.partition_point(|(p, _)| *p < hash);
        let (_, index) = self.points[at % self.points.len()];
        Some(index)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers(n: usize) -> Vec<ServerSpec> {
        (0..n)
            .map(|i| ServerSpec::new(format!("10.0.0.{}", i + 1), 11211, 1))
            .collect()
    }

    #[test]
    fn test_empty_ring() {
        assert_eq!(HashRing::new(&[]).locate("key"), None);
    }

    #[test]
    fn test_single_server_owns_everything() {
        let ring = HashRing::new(&servers(1));
        for i in 0..100 {
            assert_eq!(ring.locate(&format!("key{}", i)), Some(0));
        }
    }

    #[test]
    fn test_locate_is_deterministic() {
        let ring = HashRing::new(&servers(3));
        let again = HashRing::new(&servers(3));
        for i in 0..100 {
            let key = format!("key{}", i);
            assert_eq!(ring.locate(&key), again.locate(&key));
        }
    }

    #[test]
    fn test_keys_spread_over_servers() {
        let ring = HashRing::new(&servers(3));
        let mut seen = [0usize; 3];
        for i in 0..3000 {
            if let Some(index) = ring.locate(&format!("key{}", i)) {
                seen[index] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n > 300), "uneven spread: {:?}", seen);
    }

    #[test]
    fn test_adding_a_server_moves_few_keys() {
        let before = HashRing::new(&servers(4));
        let after = HashRing::new(&servers(5));
        let moved = (0..2000)
            .map(|i| format!("key{}", i))
            .filter(|k| {
                let (b, a) = (before.locate(k), after.locate(k));
                b != a && a != Some(4)
            })
            .count();
        assert_eq!(moved, 0);
    }
}
