use std::{error::Error, fmt};

use rand::Rng;

/// Errors produced while accessing dataset samples.
#[derive(Debug)]
pub enum DataErr {
    /// The requested sample index is out of bounds.
    OutOfBounds { index: u32, count: u32 },
    /// A sample's label doesn't fit the configured output layer.
    BadLabel { label: u32, classes: usize },
    /// The raw sample storage can't be framed into whole rows.
    RaggedStorage { len: usize, row: usize },
}

impl fmt::Display for DataErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataErr::OutOfBounds { index, count } => {
                write!(f, "sample index {index} is out of bounds for {count} samples")
            }
            DataErr::BadLabel { label, classes } => {
                write!(f, "label {label} doesn't fit a 1-based range over {classes} classes")
            }
            DataErr::RaggedStorage { len, row } => {
                write!(f, "storage of {len} values can't be framed into rows of {row}")
            }
        }
    }
}

impl Error for DataErr {}

/// One training sample: a feature vector plus its 1-based class label.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub features: Vec<f32>,
    pub label: u32,
}

/// Source of training and validation samples.
///
/// The engine only pulls samples; parsing files, extracting features and
/// anything else upstream of a ready `Trial` is the caller's job.
pub trait Dataset: Send {
    /// Returns the total number of samples.
    fn sample_count(&self) -> u32;

    /// Fetches a sample by index.
    ///
    /// # Errors
    /// Returns `DataErr::OutOfBounds` if `index` is invalid.
    fn trial(&self, index: u32) -> Result<Trial, DataErr>;

    /// Fetches a uniformly random sample.
    fn random_trial<R: Rng>(&self, rng: &mut R) -> Result<Trial, DataErr> {
        let index = rng.random_range(0..self.sample_count());
        self.trial(index)
    }
}

/// Expands a 1-based class label into a one-hot target vector.
///
/// # Errors
/// Returns `DataErr::BadLabel` when `label` is zero or exceeds `classes`.
pub fn one_hot(label: u32, classes: usize) -> Result<Vec<f32>, DataErr> {
    if label == 0 || label as usize > classes {
        return Err(DataErr::BadLabel { label, classes });
    }

    let mut target = vec![0.; classes];
    target[label as usize - 1] = 1.;
    Ok(target)
}

/// A dataset backed by one flat buffer, each row holding the feature values
/// followed by the label in the last cell.
pub struct InMemoryDataset {
    feature_count: usize,
    data: Vec<f32>,
}

impl InMemoryDataset {
    /// Creates a dataset over `data`, framed into rows of
    /// `feature_count + 1` values (features then label).
    ///
    /// # Errors
    /// Returns `DataErr::RaggedStorage` when `data` doesn't divide into
    /// whole rows.
    pub fn new(data: Vec<f32>, feature_count: usize) -> Result<Self, DataErr> {
        let row = feature_count + 1;
        if row == 1 || !data.len().is_multiple_of(row) {
            return Err(DataErr::RaggedStorage {
                len: data.len(),
                row,
            });
        }

        Ok(Self {
            feature_count,
            data,
        })
    }
}

impl Dataset for InMemoryDataset {
    fn sample_count(&self) -> u32 {
        (self.data.len() / (self.feature_count + 1)) as u32
    }

    fn trial(&self, index: u32) -> Result<Trial, DataErr> {
        let count = self.sample_count();
        if index >= count {
            return Err(DataErr::OutOfBounds { index, count });
        }

        let start = index as usize * (self.feature_count + 1);
        let features = self.data[start..start + self.feature_count].to_vec();
        let label = self.data[start + self.feature_count] as u32;
        Ok(Trial { features, label })
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn test_rows_are_framed_as_features_then_label() {
        let data = vec![
            0.1, 0.2, 1., //
            0.3, 0.4, 2., //
        ];
        let set = InMemoryDataset::new(data, 2).unwrap();

        assert_eq!(set.sample_count(), 2);
        assert_eq!(
            set.trial(1).unwrap(),
            Trial {
                features: vec![0.3, 0.4],
                label: 2
            }
        );
    }

    #[test]
    fn test_out_of_bounds_index_is_rejected() {
        let set = InMemoryDataset::new(vec![0., 1.], 1).unwrap();
        assert!(matches!(
            set.trial(5),
            Err(DataErr::OutOfBounds { index: 5, count: 1 })
        ));
    }

    #[test]
    fn test_ragged_storage_is_rejected() {
        assert!(matches!(
            InMemoryDataset::new(vec![0., 1., 2.], 1),
            Err(DataErr::RaggedStorage { len: 3, row: 2 })
        ));
    }

    #[test]
    fn test_random_trial_stays_in_bounds() {
        let set = InMemoryDataset::new(vec![0., 1., 1., 2.], 1).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..32 {
            assert!(set.random_trial(&mut rng).is_ok());
        }
    }

    #[test]
    fn test_one_hot_expansion() {
        assert_eq!(one_hot(2, 3).unwrap(), vec![0., 1., 0.]);
        assert!(matches!(one_hot(0, 3), Err(DataErr::BadLabel { .. })));
        assert!(matches!(one_hot(4, 3), Err(DataErr::BadLabel { .. })));
    }
}
