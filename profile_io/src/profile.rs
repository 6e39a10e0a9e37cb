//! Per-well morphological profiles.

use crate::table::{read_chunk, Chunk};
use anyhow::{ensure, Context, Result};
use log::info;
use parquet::file::reader::{FileReader, RowGroupReader};
use parquet::file::serialized_reader::SerializedFileReader;
use std::fs::File;
use std::path::Path;

/// Columns whose name starts with this prefix are metadata; all others are features.
pub const METADATA_PREFIX: &str = "Metadata";

/// Failures that make a profile table unusable.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ProfileError {
    /// A row does not have one value per feature column.
    #[error("profile row {row} has {found} feature values but the table has {expected} features")]
    FeatureWidth {
        /// Offending row.
        row: usize,
        /// Number of feature columns.
        expected: usize,
        /// Values found in the row.
        found: usize,
    },

    /// A feature cell is null or not a number.
    #[error("feature column {column:?} holds a non-numeric value {value} in row {row}")]
    NonNumericFeature {
        /// Feature column name.
        column: String,
        /// Offending row.
        row: usize,
        /// The value as read.
        value: String,
    },

    /// A metadata column is longer or shorter than the feature rows.
    #[error("metadata column {column:?} has {found} rows but the table has {expected}")]
    MetadataLength {
        /// Metadata column name.
        column: String,
        /// Number of feature rows.
        expected: usize,
        /// Values in the column.
        found: usize,
    },

    /// Every column carries the metadata prefix.
    #[error("no feature columns found")]
    NoFeatures,
}

/// A loaded profile dataset: one row per well, metadata split from features.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTable {
    metadata: Vec<(String, Vec<String>)>,
    feature_names: Vec<String>,
    // row-major, num_rows x feature_names.len()
    features: Vec<f64>,
}

impl ProfileTable {
    /// Assemble a table from metadata columns and row-major feature values.
    pub fn new(
        metadata: Vec<(String, Vec<String>)>,
        feature_names: Vec<String>,
        features: Vec<f64>,
    ) -> Result<Self, ProfileError> {
        let width = feature_names.len();
        if width == 0 {
            return Err(ProfileError::NoFeatures);
        }
        if features.len() % width != 0 {
            return Err(ProfileError::FeatureWidth {
                row: features.len() / width,
                expected: width,
                found: features.len() % width,
            });
        }
        let num_rows = features.len() / width;
        for (column, values) in &metadata {
            if values.len() != num_rows {
                return Err(ProfileError::MetadataLength {
                    column: column.clone(),
                    expected: num_rows,
                    found: values.len(),
                });
            }
        }
        Ok(ProfileTable {
            metadata,
            feature_names,
            features,
        })
    }

    /// Load a parquet profile file, one column chunk at a time.
    pub fn read_parquet(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| path.display().to_string())?;
        let reader = SerializedFileReader::try_from(file)
            .with_context(|| format!("reading parquet footer of {}", path.display()))?;
        let schema = reader.metadata().file_metadata().schema_descr_ptr();
        let num_rows = reader.metadata().file_metadata().num_rows() as usize;

        let mut metadata: Vec<(String, Vec<String>)> = Vec::new();
        let mut feature_names = Vec::new();
        let mut slots = Vec::with_capacity(schema.num_columns());
        for desc in schema.columns() {
            let name = desc.name().to_string();
            if name.starts_with(METADATA_PREFIX) {
                slots.push(Slot::Metadata(metadata.len()));
                metadata.push((name, Vec::with_capacity(num_rows)));
            } else {
                slots.push(Slot::Feature(feature_names.len()));
                feature_names.push(name);
            }
        }
        let width = feature_names.len();
        if width == 0 {
            return Err(ProfileError::NoFeatures.into());
        }
        let mut features = vec![0.0; num_rows * width];

        let mut offset = 0;
        for i in 0..reader.num_row_groups() {
            let row_group = reader.get_row_group(i)?;
            let group_rows = row_group.metadata().num_rows() as usize;
            ensure!(
                offset + group_rows <= num_rows,
                "{}: row groups hold more than {num_rows} rows",
                path.display()
            );
            for (j, &slot) in slots.iter().enumerate() {
                let desc = schema.column(j);
                let chunk = read_chunk(
                    row_group.get_column_reader(j)?,
                    group_rows,
                    desc.max_def_level(),
                )
                .with_context(|| format!("column {:?} of {}", desc.name(), path.display()))?;
                match (slot, chunk) {
                    (Slot::Metadata(m), Chunk::Text(cells)) => {
                        metadata[m].1.extend(cells.into_iter().map(Option::unwrap_or_default));
                    }
                    (Slot::Metadata(m), Chunk::Numbers(cells)) => {
                        metadata[m].1.extend(
                            cells
                                .into_iter()
                                .map(|c| c.map_or_else(String::new, |x| x.to_string())),
                        );
                    }
                    (Slot::Feature(f), Chunk::Numbers(cells)) => {
                        for (r, cell) in cells.into_iter().enumerate() {
                            let row = offset + r;
                            features[row * width + f] =
                                cell.ok_or_else(|| ProfileError::NonNumericFeature {
                                    column: feature_names[f].clone(),
                                    row,
                                    value: "null".to_string(),
                                })?;
                        }
                    }
                    (Slot::Feature(f), Chunk::Text(cells)) => {
                        return Err(ProfileError::NonNumericFeature {
                            column: feature_names[f].clone(),
                            row: offset,
                            value: cells.into_iter().flatten().next().unwrap_or_default(),
                        }
                        .into());
                    }
                }
            }
            offset += group_rows;
        }
        ensure!(
            offset == num_rows,
            "{}: row groups hold {offset} of {num_rows} rows",
            path.display()
        );

        let table = ProfileTable::new(metadata, feature_names, features)
            .with_context(|| path.display().to_string())?;
        info!(
            "loaded {} profiles with {} metadata and {} feature columns from {}",
            table.num_rows(),
            table.metadata.len(),
            table.num_features(),
            path.display()
        );
        Ok(table)
    }

    /// Number of profiles.
    pub fn num_rows(&self) -> usize {
        self.features.len() / self.feature_names.len()
    }

    /// Width of every feature vector.
    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Feature column names in file order.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Metadata column names in file order.
    pub fn metadata_names(&self) -> impl Iterator<Item = &str> {
        self.metadata.iter().map(|(name, _)| name.as_str())
    }

    /// Values of a metadata column, if present.
    pub fn metadata_column(&self, name: &str) -> Option<&[String]> {
        self.metadata
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// All feature values, row-major with [`ProfileTable::num_features`] values per row.
    pub fn features(&self) -> &[f64] {
        &self.features
    }

    /// Feature vector of profile `row`.
    pub fn feature_row(&self, row: usize) -> &[f64] {
        let width = self.num_features();
        &self.features[row * width..(row + 1) * width]
    }
}

/// Destination of a file column.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Metadata(usize),
    Feature(usize),
}
