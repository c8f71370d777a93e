// ============================================================
// Layer 4 - Caption File Loader
// ============================================================
// Reads a Flickr8k-style dataset directory:
//
//   <root>/
//     captions.txt      "image,caption" header, then one line per caption
//     Images/           the .jpg files named in the first column
//
// Example captions.txt:
//   image,caption
//   1000268201_693b08cb0e.jpg,A child in a pink dress is climbing up stairs .
//   1000268201_693b08cb0e.jpg,A girl going into a wooden building .
//   ...
//
// Only the first comma separates the columns; captions may contain
// commas of their own.
//
// The loader checks the grouping invariant while reading: each image's
// captions must be contiguous and there must be exactly GROUP_SIZE of
// them. A file that breaks this is rejected before any training runs.

use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::caption::{CaptionRecord, GROUP_SIZE};
use crate::domain::traits::CaptionSource;

pub const CAPTIONS_FILE: &str = "captions.txt";
pub const IMAGES_DIR:    &str = "Images";

/// Loads caption records from a Flickr8k directory.
pub struct Flickr8kLoader {
    root: PathBuf,
}

impl Flickr8kLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the image files
    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }
}

impl CaptionSource for Flickr8kLoader {
    fn load_records(&self) -> Result<Vec<CaptionRecord>> {
        let path = self.root.join(CAPTIONS_FILE);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read caption file '{}'", path.display()))?;

        let records = parse_captions(&text)
            .with_context(|| format!("Malformed caption file '{}'", path.display()))?;
        tracing::info!(
            "Loaded {} captions for {} images from '{}'",
            records.len(),
            records.len() / GROUP_SIZE,
            path.display()
        );
        Ok(records)
    }
}

/// Parse the contents of a captions file and verify its grouping.
pub fn parse_captions(text: &str) -> Result<Vec<CaptionRecord>> {
    let mut records = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Header row
        if line_no == 0 && line.eq_ignore_ascii_case("image,caption") {
            continue;
        }

        let Some((image_id, caption)) = line.split_once(',') else {
            bail!("line {}: expected 'image,caption', got '{}'", line_no + 1, line);
        };
        let image_id = image_id.trim();
        if image_id.is_empty() {
            bail!("line {}: empty image name", line_no + 1);
        }
        records.push(CaptionRecord::new(image_id, caption.trim()));
    }

    check_grouping(&records)?;
    Ok(records)
}

/// Every image must own exactly GROUP_SIZE contiguous records.
fn check_grouping(records: &[CaptionRecord]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();

    for chunk in records.chunk_by(|a, b| a.image_id == b.image_id) {
        let image_id = &chunk[0].image_id;
        if !seen.insert(image_id.as_str()) {
            bail!("captions for '{}' are not contiguous", image_id);
        }
        if chunk.len() != GROUP_SIZE {
            bail!(
                "image '{}' has {} captions, expected {}",
                image_id,
                chunk.len(),
                GROUP_SIZE
            );
        }
    }
    Ok(())
}

/// Resolve an image id to its file inside `images_dir`.
pub fn image_path(images_dir: &Path, image_id: &str) -> PathBuf {
    images_dir.join(image_id)
}
