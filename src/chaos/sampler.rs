use rand::seq::SliceRandom;
use rand::Rng;

use crate::cluster::PodInfo;

/// Number of pods killed out of `total` at `ratio`.
///
/// Floors toward zero. Non-positive or NaN ratios kill nothing; ratios at
/// or above one kill everything.
pub fn kill_count(total: usize, ratio: f64) -> usize {
    if ratio.is_nan() || ratio <= 0.0 {
        return 0;
    }
    if ratio >= 1.0 {
        return total;
    }
    (total as f64 * ratio).floor() as usize
}

/// Pick a uniformly random kill-set of `floor(len * ratio)` pods.
pub fn sample(pods: Vec<PodInfo>, ratio: f64) -> Vec<PodInfo> {
    sample_with(pods, ratio, &mut rand::thread_rng())
}

/// [`sample`] with a caller-provided random source
pub fn sample_with<R: Rng + ?Sized>(mut pods: Vec<PodInfo>, ratio: f64, rng: &mut R) -> Vec<PodInfo> {
    let count = kill_count(pods.len(), ratio);
    pods.shuffle(rng);
    pods.truncate(count);
    pods
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn pods(n: usize) -> Vec<PodInfo> {
        (0..n)
            .map(|i| PodInfo::new("default", format!("pod-{}", i)))
            .collect()
    }

    #[test]
    fn test_kill_count_bounds() {
        assert_eq!(kill_count(10, 0.5), 5);
        assert_eq!(kill_count(3, 0.5), 1);
        assert_eq!(kill_count(10, 0.0), 0);
        assert_eq!(kill_count(10, -1.0), 0);
        assert_eq!(kill_count(10, f64::NAN), 0);
        assert_eq!(kill_count(10, 1.0), 10);
        assert_eq!(kill_count(10, 7.5), 10);
        assert_eq!(kill_count(0, 0.5), 0);
    }

    #[test]
    fn test_sample_is_subset_of_requested_size() {
        let mut rng = StdRng::seed_from_u64(7);
        let input = pods(10);
        let names: HashSet<String> = input.iter().map(|p| p.name.clone()).collect();

        for _ in 0..20 {
            let picked = sample_with(input.clone(), 0.3, &mut rng);
            assert_eq!(picked.len(), 3);
            assert!(picked.iter().all(|p| names.contains(&p.name)));

            let unique: HashSet<&str> = picked.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(unique.len(), picked.len());
        }
    }

    #[test]
    fn test_full_ratio_returns_everything() {
        let picked = sample(pods(5), 1.0);
        assert_eq!(picked.len(), 5);
    }

    #[test]
    fn test_sample_is_not_input_order() {
        let mut rng = StdRng::seed_from_u64(42);
        let input = pods(20);
        let first: Vec<String> = input.iter().take(10).map(|p| p.name.clone()).collect();

        // With 20 pods the chance of a shuffle keeping the first 10 in place
        // twenty times in a row is negligible.
        let always_prefix = (0..20).all(|_| {
            let picked = sample_with(input.clone(), 0.5, &mut rng);
            picked.iter().map(|p| p.name.clone()).collect::<Vec<_>>() == first
        });
        assert!(!always_prefix);
    }
}
