//! Weighted selection state for one routing group.
use std::collections::BTreeMap;

use rand::Rng;

/// Parallel-vector index over a group's members.
///
/// Selection is a hot path: a contiguous prefix-sum walk over integer
/// weights beats a map here, and groups are small (tens of entries at
/// most). `used_weights[i]` is either `weights[i]` or zero depending on
/// whether some node currently advertises `services[i]`.
#[derive(Clone, Debug)]
pub struct GroupIndex {
    services: Vec<String>,
    weights: Vec<u32>,
    used_weights: Vec<u32>,
    sum: u64,
}

impl GroupIndex {
    /// Build an index from a group's persistent mapping. Entries come out
    /// sorted by service name, which keeps member indices stable for a
    /// given mapping.
    pub fn new(mapping: &BTreeMap<String, u32>) -> Self {
        let mut services = Vec::with_capacity(mapping.len());
        let mut weights = Vec::with_capacity(mapping.len());

        for (name, weight) in mapping {
            services.push(name.clone());
            weights.push(*weight);
        }

        let used_weights = vec![0; weights.len()];

        Self {
            services,
            weights,
            used_weights,
            sum: 0,
        }
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    pub fn used_weights(&self) -> &[u32] {
        &self.used_weights
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// Activate a member. The caller only invokes this on the 0 -> present
    /// transition of the member's global availability.
    pub fn add(&mut self, index: usize) {
        debug_assert_eq!(self.used_weights[index], 0);

        self.used_weights[index] = self.weights[index];
        self.sum += u64::from(self.weights[index]);
    }

    /// Deactivate a member. Counterpart of `add`.
    pub fn remove(&mut self, index: usize) {
        debug_assert_eq!(self.used_weights[index], self.weights[index]);

        self.sum -= u64::from(self.used_weights[index]);
        self.used_weights[index] = 0;
    }

    /// Draw one member, weighted by `used_weights`. None when no member is
    /// currently active.
    pub fn select<R: Rng>(&self, rng: &mut R) -> Option<&str> {
        if self.sum == 0 {
            return None;
        }

        let mut draw = rng.random_range(0..self.sum);

        for (index, weight) in self.used_weights.iter().enumerate() {
            let weight = u64::from(*weight);

            if draw < weight {
                return Some(&self.services[index]);
            }

            draw -= weight;
        }

        // sum > 0 guarantees the walk terminates inside the loop.
        unreachable!("weighted draw fell off the used_weights prefix sum")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mapping(entries: &[(&str, u32)]) -> BTreeMap<String, u32> {
        entries
            .iter()
            .map(|(name, weight)| (name.to_string(), *weight))
            .collect()
    }

    #[test]
    fn test_construction_sorts_by_name() {
        let index = GroupIndex::new(&mapping(&[("zeta", 2), ("alpha", 1), ("mid", 5)]));

        assert_eq!(index.services(), ["alpha", "mid", "zeta"]);
        assert_eq!(index.weights(), [1, 5, 2]);
        assert_eq!(index.used_weights(), [0, 0, 0]);
        assert_eq!(index.sum(), 0);
    }

    #[test]
    fn test_add_remove_maintain_sum() {
        let mut index = GroupIndex::new(&mapping(&[("a", 1), ("b", 3)]));

        index.add(1);
        assert_eq!(index.used_weights(), [0, 3]);
        assert_eq!(index.sum(), 3);

        index.add(0);
        assert_eq!(index.sum(), 4);

        index.remove(1);
        assert_eq!(index.used_weights(), [1, 0]);
        assert_eq!(index.sum(), 1);

        index.remove(0);
        assert_eq!(index.sum(), 0);
    }

    #[test]
    fn test_select_empty_group_fails() {
        let index = GroupIndex::new(&mapping(&[("a", 1)]));
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(index.select(&mut rng), None);
    }

    #[test]
    fn test_select_single_active_member() {
        let mut index = GroupIndex::new(&mapping(&[("a", 1), ("b", 3)]));
        index.add(0);

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(index.select(&mut rng), Some("a"));
        }
    }

    #[test]
    fn test_select_follows_weights() {
        let mut index = GroupIndex::new(&mapping(&[("db_a", 1), ("db_b", 3)]));
        index.add(0);
        index.add(1);

        let mut rng = StdRng::seed_from_u64(42);
        let draws = 10_000;
        let mut hits_b = 0;

        for _ in 0..draws {
            if index.select(&mut rng) == Some("db_b") {
                hits_b += 1;
            }
        }

        // Expected 7500 of 10000. A generous band keeps the test stable
        // across rand versions while still catching a broken walk.
        assert!(
            (7200..=7800).contains(&hits_b),
            "db_b selected {} times out of {}",
            hits_b,
            draws
        );
    }
}
