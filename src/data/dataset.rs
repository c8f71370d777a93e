use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataset::Dataset;

use crate::data::image::{ImageLoader, ImageTensor};
use crate::data::loader::image_path;
use crate::domain::caption::{CaptionRecord, GROUP_SIZE};
use crate::domain::error::CaptionError;

/// One dataset entry: an image and one of its encoded captions.
/// Caption format: <START> w1 ... wn <END>, unpadded.
#[derive(Debug, Clone)]
pub struct CaptionItem {
    pub image_id: String,
    pub image:    ImageTensor,
    pub caption:  Vec<u32>,
}

/// Where the pixels come from.
pub enum ImageStore {
    /// Already decoded, shared by all captions of the image
    InMemory(Vec<ImageTensor>),
    /// Decoded on every `get`; keeps memory flat for large datasets
    Files { paths: Vec<PathBuf>, loader: ImageLoader },
}

impl ImageStore {
    fn get(&self, image_idx: usize) -> Option<ImageTensor> {
        match self {
            Self::InMemory(images) => images.get(image_idx).cloned(),
            Self::Files { paths, loader } => {
                let path = paths.get(image_idx)?;
                match loader.load(path) {
                    Ok(img) => Some(img),
                    Err(e) => {
                        // The trainer counts samples per epoch and turns the
                        // shortfall into an IncompleteEpoch error.
                        tracing::error!("{e:#}");
                        None
                    }
                }
            }
        }
    }
}

/// Captioning dataset laid out in contiguous groups of GROUP_SIZE entries.
pub struct CaptionDataset {
    image_ids: Vec<String>,
    images:    ImageStore,
    captions:  Vec<Vec<u32>>,
}

impl CaptionDataset {
    fn grouped(
        image_ids: Vec<String>,
        images:    ImageStore,
        captions:  Vec<Vec<u32>>,
    ) -> Result<Self, CaptionError> {
        if captions.len() % GROUP_SIZE != 0 || captions.len() / GROUP_SIZE != image_ids.len() {
            return Err(CaptionError::UngroupedDataset { len: captions.len(), group: GROUP_SIZE });
        }
        Ok(Self { image_ids, images, captions })
    }

    /// Dataset over decoded images. `captions[i]` belongs to `images[i / GROUP_SIZE]`.
    pub fn in_memory(
        image_ids: Vec<String>,
        images:    Vec<ImageTensor>,
        captions:  Vec<Vec<u32>>,
    ) -> Result<Self, CaptionError> {
        if images.len() != image_ids.len() {
            return Err(CaptionError::shape(format!(
                "{} images for {} image ids",
                images.len(),
                image_ids.len()
            )));
        }
        Self::grouped(image_ids, ImageStore::InMemory(images), captions)
    }

    /// Dataset over image files. `records` and `captions` are parallel and
    /// already verified to be grouped by the loader.
    ///
    /// Every referenced image must exist; pixels are still decoded lazily.
    pub fn from_files(
        records:    &[CaptionRecord],
        captions:   Vec<Vec<u32>>,
        images_dir: &Path,
        loader:     ImageLoader,
    ) -> Result<Self, CaptionError> {
        if records.len() != captions.len() {
            return Err(CaptionError::shape(format!(
                "{} caption records but {} encoded captions",
                records.len(),
                captions.len()
            )));
        }
        let image_ids: Vec<String> = records
            .iter()
            .step_by(GROUP_SIZE)
            .map(|r| r.image_id.clone())
            .collect();
        let paths: Vec<PathBuf> = image_ids.iter().map(|id| image_path(images_dir, id)).collect();

        let missing: Vec<&PathBuf> = paths.iter().filter(|p| !p.is_file()).collect();
        if let Some(first) = missing.first() {
            return Err(CaptionError::MissingImages {
                missing: missing.len(),
                total:   paths.len(),
                first:   (*first).clone(),
            });
        }
        Self::grouped(image_ids, ImageStore::Files { paths, loader }, captions)
    }

    pub fn image_count(&self) -> usize {
        self.image_ids.len()
    }
}

impl Dataset<CaptionItem> for CaptionDataset {
    fn get(&self, index: usize) -> Option<CaptionItem> {
        let caption   = self.captions.get(index)?.clone();
        let image_idx = index / GROUP_SIZE;
        let image     = self.images.get(image_idx)?;
        Some(CaptionItem {
            image_id: self.image_ids[image_idx].clone(),
            image,
            caption,
        })
    }

    fn len(&self) -> usize {
        self.captions.len()
    }
}

/// View of a shared dataset restricted to a list of indices.
pub struct SubsetDataset<D> {
    inner:   Arc<D>,
    indices: Vec<usize>,
}

impl<D> SubsetDataset<D> {
    pub fn new(inner: Arc<D>, indices: Vec<usize>) -> Self {
        Self { inner, indices }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl<D: Dataset<CaptionItem>> Dataset<CaptionItem> for SubsetDataset<D> {
    fn get(&self, index: usize) -> Option<CaptionItem> {
        self.indices.get(index).and_then(|&i| self.inner.get(i))
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `images` images of shape [3, size, size], each with GROUP_SIZE
    /// captions `<START> 4+img k <END>` of varying length.
    pub(crate) fn synthetic_dataset(images: usize, size: usize) -> CaptionDataset {
        let ids    = (0..images).map(|i| format!("img_{i}.jpg")).collect();
        let pixels = (0..images)
            .map(|i| ImageTensor::filled([3, size, size], i as f32 / images.max(1) as f32))
            .collect();
        let captions = (0..images * GROUP_SIZE)
            .map(|n| {
                let img = (n / GROUP_SIZE) as u32;
                let mut c = vec![1];
                c.extend(std::iter::repeat(4 + img % 4).take(1 + n % 3));
                c.push(2);
                c
            })
            .collect();
        CaptionDataset::in_memory(ids, pixels, captions).unwrap()
    }

    #[test]
    fn test_entries_share_their_group_image() {
        let ds = synthetic_dataset(2, 4);
        assert_eq!(ds.len(), 10);
        assert_eq!(ds.image_count(), 2);
        assert_eq!(ds.get(0).unwrap().image_id, "img_0.jpg");
        assert_eq!(ds.get(4).unwrap().image_id, "img_0.jpg");
        assert_eq!(ds.get(5).unwrap().image_id, "img_1.jpg");
        assert!(ds.get(10).is_none());
    }

    #[test]
    fn test_rejects_partial_groups() {
        let err = CaptionDataset::in_memory(
            vec!["a".into()],
            vec![ImageTensor::filled([3, 2, 2], 0.0)],
            vec![vec![1, 2]; 4],
        );
        assert!(matches!(err, Err(CaptionError::UngroupedDataset { len: 4, .. })));
    }

    #[test]
    fn test_subset_maps_indices() {
        let ds  = Arc::new(synthetic_dataset(3, 2));
        let sub = SubsetDataset::new(ds, vec![10, 11, 0]);
        assert_eq!(sub.len(), 3);
        assert_eq!(sub.get(0).unwrap().image_id, "img_2.jpg");
        assert_eq!(sub.get(2).unwrap().image_id, "img_0.jpg");
        assert!(sub.get(3).is_none());
    }

    #[test]
    fn test_missing_image_files_are_reported_up_front() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("here.jpg"), b"bytes").unwrap();

        let mut records: Vec<_> = (0..GROUP_SIZE).map(|_| CaptionRecord::new("here.jpg", "x")).collect();
        records.extend((0..GROUP_SIZE).map(|_| CaptionRecord::new("gone.jpg", "x")));
        let err = CaptionDataset::from_files(
            &records,
            vec![vec![1, 2]; 2 * GROUP_SIZE],
            dir.path(),
            ImageLoader::new(4, [0.0; 3], [1.0; 3]),
        )
        .err()
        .unwrap();

        match err {
            CaptionError::MissingImages { missing, total, first } => {
                assert_eq!((missing, total), (1, 2));
                assert!(first.ends_with("gone.jpg"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_file_backed_undecodable_image_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not an image").unwrap();

        let records: Vec<_> = (0..GROUP_SIZE).map(|_| CaptionRecord::new("broken.jpg", "x")).collect();
        let ds = CaptionDataset::from_files(
            &records,
            vec![vec![1, 2]; GROUP_SIZE],
            dir.path(),
            ImageLoader::new(4, [0.0; 3], [1.0; 3]),
        )
        .unwrap();
        assert_eq!(ds.len(), GROUP_SIZE);
        assert!(ds.get(0).is_none());
    }
}
