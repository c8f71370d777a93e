// ============================================================
// Layer 3 - Caption Domain Types
// ============================================================
// A captioning dataset is a flat list of (image, caption) entries.
// Every image owns exactly GROUP_SIZE captions and those captions
// are stored next to each other:
//
//   index:  0 1 2 3 4 | 5 6 7 8 9 | ...
//   image:  A A A A A | B B B B B | ...
//
// The splitter relies on this layout to keep a group on one side
// of the train/test boundary.

use serde::{Deserialize, Serialize};

/// Number of ground-truth captions stored per image.
pub const GROUP_SIZE: usize = 5;

/// One raw line of the caption file: which image, and what was said about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionRecord {
    /// File name of the image, relative to the dataset's image directory
    pub image_id: String,

    /// Caption text as written by the annotator
    pub caption: String,
}

impl CaptionRecord {
    pub fn new(image_id: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            caption:  caption.into(),
        }
    }
}

/// A generated caption next to the reference it should resemble.
/// Handed to the metrics sink for qualitative inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionExample {
    pub image_id:  String,
    pub reference: String,
    pub generated: String,
}

/// Range of entry indices that make up group `group`.
pub fn group_range(group: usize) -> std::ops::Range<usize> {
    let start = group * GROUP_SIZE;
    start..start + GROUP_SIZE
}

/// Number of complete groups in a dataset of `len` entries.
pub fn group_count(len: usize) -> usize {
    len / GROUP_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_range_covers_five_entries() {
        assert_eq!(group_range(0), 0..5);
        assert_eq!(group_range(3), 15..20);
    }

    #[test]
    fn test_group_count() {
        assert_eq!(group_count(50), 10);
        assert_eq!(group_count(0), 0);
    }
}
