// ============================================================
// Layer 4 - Train/Test Splitter
// ============================================================
// Splits a grouped captioning dataset into train and test index
// lists. The unit of shuffling is the caption GROUP (one image and
// its five captions), never the individual caption:
//
//   groups:    [0..5) [5..10) [10..15) [15..20) ...
//   shuffle:   [10..15) [0..5) [15..20) [5..10) ...
//   split:     └──── train ────┘ └──── test ───┘
//
// If captions were shuffled one by one, the same image would show up
// on both sides with different captions and the test score would
// measure memorisation.
//
// Two modes:
//   all_captions = true   train gets every caption of its images
//   all_captions = false  train gets only the first caption of each
//                         image; test still gets all five
//
// Number of train images = floor(num_groups * train_fraction).
//
// The RNG is passed in by the caller. Seed it once with
// StdRng::seed_from_u64 to make the split reproducible.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::domain::caption::{group_count, group_range, GROUP_SIZE};
use crate::domain::error::CaptionError;

/// Shuffle groups of `dataset_len` entries and split them into
/// (train_indices, test_indices).
///
/// # Errors
/// `UngroupedDataset` if `dataset_len` is not a multiple of GROUP_SIZE.
pub fn split_subsets<R: Rng + ?Sized>(
    dataset_len:    usize,
    train_fraction: f64,
    all_captions:   bool,
    rng:            &mut R,
) -> Result<(Vec<usize>, Vec<usize>), CaptionError> {
    if dataset_len % GROUP_SIZE != 0 {
        return Err(CaptionError::UngroupedDataset { len: dataset_len, group: GROUP_SIZE });
    }
    if !(0.0..=1.0).contains(&train_fraction) {
        return Err(CaptionError::config(format!(
            "train_fraction must be within [0, 1], got {train_fraction}"
        )));
    }

    let num_groups = group_count(dataset_len);
    let mut groups: Vec<usize> = (0..num_groups).collect();
    groups.shuffle(rng);

    let num_train = ((num_groups as f64) * train_fraction).floor() as usize;
    let (train_groups, test_groups) = groups.split_at(num_train.min(num_groups));

    let train: Vec<usize> = if all_captions {
        train_groups.iter().flat_map(|&g| group_range(g)).collect()
    } else {
        train_groups.iter().map(|&g| group_range(g).start).collect()
    };
    let test: Vec<usize> = test_groups.iter().flat_map(|&g| group_range(g)).collect();

    tracing::debug!(
        "Dataset split: {} train groups ({} entries), {} test groups ({} entries)",
        train_groups.len(),
        train.len(),
        test_groups.len(),
        test.len(),
    );

    Ok((train, test))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    fn groups_of(indices: &[usize]) -> HashSet<usize> {
        indices.iter().map(|i| i / GROUP_SIZE).collect()
    }

    #[test]
    fn test_ten_images_eighty_percent() {
        let mut rng = StdRng::seed_from_u64(7);
        let (train, test) = split_subsets(50, 0.8, true, &mut rng).unwrap();

        assert_eq!(train.len(), 40);
        assert_eq!(test.len(), 10);
        assert_eq!(groups_of(&train).len(), 8);
        assert_eq!(groups_of(&test).len(), 2);
        assert!(groups_of(&train).is_disjoint(&groups_of(&test)));
    }

    #[test]
    fn test_groups_never_straddle_for_any_seed() {
        for seed in 0..25 {
            for &fraction in &[0.0, 0.1, 0.33, 0.5, 0.75, 1.0] {
                let mut rng = StdRng::seed_from_u64(seed);
                let (train, test) = split_subsets(35, fraction, true, &mut rng).unwrap();

                assert_eq!(train.len() + test.len(), 35);
                assert!(groups_of(&train).is_disjoint(&groups_of(&test)));

                let all: HashSet<usize> = train.iter().chain(&test).copied().collect();
                assert_eq!(all.len(), 35);
            }
        }
    }

    #[test]
    fn test_groups_stay_contiguous_in_output() {
        let mut rng = StdRng::seed_from_u64(3);
        let (train, _) = split_subsets(25, 0.6, true, &mut rng).unwrap();
        for chunk in train.chunks(GROUP_SIZE) {
            let g = chunk[0] / GROUP_SIZE;
            assert_eq!(chunk, group_range(g).collect::<Vec<_>>().as_slice());
        }
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = split_subsets(100, 0.8, true, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = split_subsets(100, 0.8, true, &mut StdRng::seed_from_u64(42)).unwrap();
        let c = split_subsets(100, 0.8, true, &mut StdRng::seed_from_u64(43)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.0, c.0);
    }

    #[test]
    fn test_first_caption_mode() {
        let mut rng = StdRng::seed_from_u64(11);
        let (train, test) = split_subsets(50, 0.8, false, &mut rng).unwrap();

        // One caption (the group start) per train image
        assert_eq!(train.len(), 8);
        assert!(train.iter().all(|i| i % GROUP_SIZE == 0));
        // Test images keep all five captions
        assert_eq!(test.len(), 10);
        assert!(groups_of(&train).is_disjoint(&groups_of(&test)));
    }

    #[test]
    fn test_rejects_length_not_multiple_of_group() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = split_subsets(12, 0.8, true, &mut rng).unwrap_err();
        assert!(matches!(err, CaptionError::UngroupedDataset { len: 12, group: 5 }));
    }

    #[test]
    fn test_empty_dataset() {
        let mut rng = StdRng::seed_from_u64(0);
        let (train, test) = split_subsets(0, 0.8, true, &mut rng).unwrap();
        assert!(train.is_empty());
        assert!(test.is_empty());
    }
}
