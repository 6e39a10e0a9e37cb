//! Per-perturbation consensus profiles and their example image templates.

use crate::errors::JumpRrError;
use anyhow::{Context, Result};
use itertools::Itertools;
use log::info;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_stats::interpolate::Midpoint;
use ndarray_stats::QuantileExt;
use noisy_float::types::{n64, N64};
use profile_io::ProfileTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder in the image URL template replaced by the well key.
pub const WELL_PLACEHOLDER: &str = "{well}";
/// Placeholder in the image URL template replaced by the site number.
pub const SITE_PLACEHOLDER: &str = "{site}";

/// How the wells of one perturbation are collapsed into a single vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Per-feature median.
    #[default]
    Median,
    /// Per-feature mean.
    Mean,
}

impl Reduction {
    /// Collapse the well rows of one perturbation into a single vector. An even number
    /// of wells has the mean of the two central values as its median.
    fn reduce(self, wells: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        match self {
            Reduction::Mean => wells.mean_axis(Axis(0)).context("no wells to reduce"),
            Reduction::Median => {
                let mut wells = wells.mapv(n64);
                let median = wells.quantile_axis_mut(Axis(0), n64(0.5), &Midpoint)?;
                Ok(median.mapv(N64::raw))
            }
        }
    }
}

/// One perturbation: its identifier and an image URL template per well.
///
/// Templates still carry the site placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Perturbation {
    /// Perturbation identifier.
    pub id: String,
    /// One URL template per distinct well, in well order.
    pub image_templates: Vec<String>,
}

/// Perturbations and their consensus vectors, addressed by a single position.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusProfiles {
    records: Vec<Perturbation>,
    features: Array2<f64>,
}

impl ConsensusProfiles {
    /// Pair records with consensus rows; row `i` belongs to record `i`.
    pub fn new(records: Vec<Perturbation>, features: Array2<f64>) -> Result<Self, JumpRrError> {
        if records.len() != features.nrows() {
            return Err(JumpRrError::MisalignedRecords {
                records: records.len(),
                rows: features.nrows(),
            });
        }
        // Every record needs at least one image to cycle through.
        if records.iter().any(|p| p.image_templates.is_empty()) {
            return Err(JumpRrError::EmptyCycle);
        }
        Ok(ConsensusProfiles { records, features })
    }

    /// Group well profiles by `id_column` and reduce each group.
    ///
    /// Perturbations are ordered by identifier. Each well contributes the template
    /// `image_template` with the well key, its `well_key_columns` values joined by `__`,
    /// substituted for `{well}`.
    pub fn from_profiles(
        dataset: &str,
        profiles: &ProfileTable,
        id_column: &str,
        well_key_columns: &[String],
        image_template: &str,
        reduction: Reduction,
    ) -> Result<Self> {
        let missing = |column: &str| JumpRrError::MissingColumn {
            dataset: dataset.to_string(),
            column: column.to_string(),
        };
        let ids = profiles
            .metadata_column(id_column)
            .ok_or_else(|| missing(id_column))?;
        let key_columns = well_key_columns
            .iter()
            .map(|c| profiles.metadata_column(c).ok_or_else(|| missing(c)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (row, id) in ids.iter().enumerate() {
            groups.entry(id.as_str()).or_default().push(row);
        }

        let width = profiles.num_features();
        let wells = ArrayView2::from_shape((profiles.num_rows(), width), profiles.features())?;
        let mut records = Vec::with_capacity(groups.len());
        let mut features = Array2::zeros((groups.len(), width));
        for (i, (id, rows)) in groups.into_iter().enumerate() {
            let group = wells.select(Axis(0), &rows);
            if let Some(((_, f), _)) = group.indexed_iter().find(|(_, x)| !x.is_finite()) {
                return Err(JumpRrError::NonFiniteFeature {
                    id: id.to_string(),
                    feature: profiles.feature_names()[f].clone(),
                }
                .into());
            }
            features.row_mut(i).assign(&reduction.reduce(group.view())?);
            let image_templates = rows
                .iter()
                .map(|&r| {
                    let key = key_columns.iter().map(|c| c[r].as_str()).join("__");
                    image_template.replace(WELL_PLACEHOLDER, &key)
                })
                .unique()
                .collect();
            records.push(Perturbation {
                id: id.to_string(),
                image_templates,
            });
        }

        info!(
            "{dataset}: reduced {} profiles to {} consensus vectors ({reduction:?})",
            profiles.num_rows(),
            records.len()
        );
        Ok(ConsensusProfiles::new(records, features)?)
    }

    /// Number of perturbations.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when there are no perturbations.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Perturbations in position order.
    pub fn records(&self) -> &[Perturbation] {
        &self.records
    }

    /// Consensus matrix, one row per record.
    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    /// Record and consensus vector at position `i`.
    pub fn get(&self, i: usize) -> (&Perturbation, ArrayView1<'_, f64>) {
        (&self.records[i], self.features.row(i))
    }

    /// Identifiers in position order.
    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|p| p.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    const TEMPLATE: &str = "https://example.org/images/{well}_{site}.jpg";

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn profiles() -> ProfileTable {
        ProfileTable::new(
            vec![
                (
                    "Metadata_JCP2022".to_string(),
                    s(&["JCP2022_B", "JCP2022_A", "JCP2022_B", "JCP2022_B"]),
                ),
                ("Metadata_Plate".to_string(), s(&["P1", "P1", "P2", "P2"])),
                ("Metadata_Well".to_string(), s(&["A01", "A02", "A01", "A01"])),
            ],
            s(&["f1", "f2"]),
            vec![1.0, 10.0, 5.0, 5.0, 3.0, 20.0, 8.0, 60.0],
        )
        .unwrap()
    }

    #[test]
    fn test_median_consensus_and_templates() {
        let c = ConsensusProfiles::from_profiles(
            "crispr",
            &profiles(),
            "Metadata_JCP2022",
            &s(&["Metadata_Plate", "Metadata_Well"]),
            TEMPLATE,
            Reduction::Median,
        )
        .unwrap();
        assert_eq!(c.ids(), vec!["JCP2022_A", "JCP2022_B"]);
        assert_eq!(c.features(), array![[5.0, 5.0], [3.0, 20.0]]);
        let (b, row) = c.get(1);
        assert_eq!(row.to_vec(), vec![3.0, 20.0]);
        assert_eq!(
            b.image_templates,
            s(&[
                "https://example.org/images/P1__A01_{site}.jpg",
                "https://example.org/images/P2__A01_{site}.jpg",
            ])
        );
    }

    #[test]
    fn test_mean_consensus() {
        let c = ConsensusProfiles::from_profiles(
            "crispr",
            &profiles(),
            "Metadata_JCP2022",
            &s(&["Metadata_Well"]),
            TEMPLATE,
            Reduction::Mean,
        )
        .unwrap();
        assert_eq!(c.features().row(1).to_vec(), vec![4.0, 30.0]);
        assert_eq!(c.records()[1].image_templates.len(), 1);
    }

    #[test]
    fn test_median_of_even_count() {
        let wells = array![[4.0, 7.0], [1.0, 7.0], [3.0, 7.0], [2.0, 7.0]];
        assert_eq!(
            Reduction::Median.reduce(wells.view()).unwrap(),
            array![2.5, 7.0]
        );
        let single = array![[7.0, -1.0]];
        assert_eq!(
            Reduction::Median.reduce(single.view()).unwrap(),
            array![7.0, -1.0]
        );
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let err = ConsensusProfiles::from_profiles(
            "orf",
            &profiles(),
            "Metadata_JCP2022",
            &s(&["Metadata_Source"]),
            TEMPLATE,
            Reduction::Median,
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<JumpRrError>(),
            Some(&JumpRrError::MissingColumn {
                dataset: "orf".to_string(),
                column: "Metadata_Source".to_string()
            })
        );
    }

    #[test]
    fn test_non_finite_feature_is_fatal() {
        let table = ProfileTable::new(
            vec![("Metadata_JCP2022".to_string(), s(&["JCP2022_A"]))],
            s(&["f1"]),
            vec![f64::NAN],
        )
        .unwrap();
        let err = ConsensusProfiles::from_profiles(
            "crispr",
            &table,
            "Metadata_JCP2022",
            &[],
            TEMPLATE,
            Reduction::Median,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<JumpRrError>(),
            Some(JumpRrError::NonFiniteFeature { .. })
        ));
    }

    #[test]
    fn test_records_must_align_with_rows() {
        let records = vec![Perturbation {
            id: "JCP2022_A".to_string(),
            image_templates: s(&[TEMPLATE]),
        }];
        assert_eq!(
            ConsensusProfiles::new(records, Array2::zeros((2, 3))).unwrap_err(),
            JumpRrError::MisalignedRecords {
                records: 1,
                rows: 2
            }
        );
    }
}
