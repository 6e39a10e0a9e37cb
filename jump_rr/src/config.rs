//! Run configuration, read from TOML. Every key is optional.

use crate::consensus::{Reduction, SITE_PLACEHOLDER, WELL_PLACEHOLDER};
use crate::errors::JumpRrError;
use crate::similarity::DistanceMetric;
use anyhow::{bail, Context, Result};
use itertools::Itertools;
use log::{info, warn};
use serde::Deserialize;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// One input profile dataset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    /// Dataset name: input subdirectory, output file stem and `plate_type` filter.
    pub name: String,
    /// Parquet file stem inside `<input_dir>/<name>/`.
    pub filename: String,
    /// Imaging sites per well.
    #[serde(default = "default_n_sites")]
    pub n_sites: u32,
}

fn default_n_sites() -> u32 {
    9
}

impl DatasetConfig {
    /// A dataset with the default number of imaging sites.
    pub fn new(name: &str, filename: &str) -> Self {
        DatasetConfig {
            name: name.to_string(),
            filename: filename.to_string(),
            n_sites: default_n_sites(),
        }
    }

    /// `<input_dir>/<name>/<filename>.parquet`
    pub fn profiles_path(&self, input_dir: &Path) -> PathBuf {
        input_dir
            .join(&self.name)
            .join(format!("{}.parquet", self.filename))
    }
}

/// Input and output column names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnNames {
    /// Identifier without the metadata prefix; also the raw identifier output column.
    pub id_short: String,
    /// Metadata columns whose values, joined, name a well's images.
    pub well_key: Vec<String>,
    /// Output column of the match name.
    pub matched: String,
    /// Output column of the match image.
    pub match_example: String,
    /// Output column of the similarity or distance.
    pub similarity: String,
    /// Output column of the subject name.
    pub standard_name: String,
    /// Output column of the match's external link.
    pub match_resources: String,
    /// Metadata table column with the standard name.
    pub lookup_name: String,
    /// Metadata table column with the external resource id.
    pub lookup_external_id: String,
    /// Metadata table column compared with the dataset name.
    pub lookup_filter: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        ColumnNames {
            id_short: "JCP2022".to_string(),
            well_key: vec![
                "Metadata_Source".to_string(),
                "Metadata_Plate".to_string(),
                "Metadata_Well".to_string(),
            ],
            matched: "Match".to_string(),
            match_example: "Match Example".to_string(),
            similarity: "Similarity".to_string(),
            standard_name: "Gene/Compound".to_string(),
            match_resources: "Match resources".to_string(),
            lookup_name: "standard_key".to_string(),
            lookup_external_id: "NCBI_Gene_ID".to_string(),
            lookup_filter: "plate_type".to_string(),
        }
    }
}

impl ColumnNames {
    /// Identifier column of the input profiles.
    pub fn id_column(&self) -> String {
        format!("{}_{}", profile_io::METADATA_PREFIX, self.id_short)
    }

    /// Output column of the subject example image.
    pub fn subject_example(&self) -> String {
        format!("{} Example", self.standard_name)
    }
}

/// URL templates for images and external links.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Templates {
    /// Holds `{well}` and `{site}`.
    pub image_url: String,
    /// Display width of example images, in pixels.
    pub image_width: u32,
    /// Holds `{id}`.
    pub external_url: String,
    /// Label of external links.
    pub external_label: String,
}

impl Default for Templates {
    fn default() -> Self {
        Templates {
            image_url: "https://phenaid.ardigen.com/static-jumpcpexplorer/images/{well}_{site}.jpg"
                .to_string(),
            image_width: 200,
            external_url: "https://www.ncbi.nlm.nih.gov/gene/{id}".to_string(),
            external_label: "External".to_string(),
        }
    }
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Root of the per-dataset profile directories.
    pub input_dir: PathBuf,
    /// Directory receiving one parquet file per dataset.
    pub output_dir: PathBuf,
    /// Number of closest and of farthest matches kept per perturbation.
    pub n_vals_used: usize,
    /// Publish `round(1 - distance, 3)` instead of the raw distance.
    pub dist_as_sim: bool,
    /// Distance between consensus profiles.
    pub metric: DistanceMetric,
    /// How wells are collapsed into consensus profiles.
    pub reduction: Reduction,
    /// Worker threads; all cores when unset.
    pub num_threads: Option<usize>,
    /// CSV metadata table used to translate identifiers.
    pub metadata_table: Option<PathBuf>,
    /// Input and output column names.
    pub columns: ColumnNames,
    /// Image and link URL templates.
    pub templates: Templates,
    /// Datasets processed, in order.
    pub datasets: Vec<DatasetConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            input_dir: PathBuf::from("/dgx1nas1/storage/data/shared/morphmap_profiles/"),
            output_dir: PathBuf::from("./databases"),
            n_vals_used: 25,
            dist_as_sim: true,
            metric: DistanceMetric::Cosine,
            reduction: Reduction::Median,
            num_threads: None,
            metadata_table: None,
            columns: ColumnNames::default(),
            templates: Templates::default(),
            datasets: vec![
                DatasetConfig::new("crispr", "harmonized_no_sphering_profiles"),
                DatasetConfig::new("orf", "transformed_inf_eff_filtered"),
            ],
        }
    }
}

fn note_non_default<T: PartialEq + Debug>(name: &str, value: &T, default: &T) {
    if value != default {
        warn!("using non-default {name} = {value:?}");
    }
}

impl RunConfig {
    /// Read a TOML config, or the built-in defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            None => {
                info!("no config given, using built-in defaults");
                RunConfig::default()
            }
            Some(path) => {
                let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
                let config: RunConfig =
                    toml::from_str(&s).with_context(|| path.display().to_string())?;
                info!("read config from {}", path.display());
                config.log_non_defaults();
                config
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn log_non_defaults(&self) {
        let d = RunConfig::default();
        note_non_default("input_dir", &self.input_dir, &d.input_dir);
        note_non_default("output_dir", &self.output_dir, &d.output_dir);
        note_non_default("n_vals_used", &self.n_vals_used, &d.n_vals_used);
        note_non_default("dist_as_sim", &self.dist_as_sim, &d.dist_as_sim);
        note_non_default("metric", &self.metric, &d.metric);
        note_non_default("reduction", &self.reduction, &d.reduction);
        note_non_default("num_threads", &self.num_threads, &d.num_threads);
        note_non_default("columns", &self.columns, &d.columns);
        note_non_default("templates", &self.templates, &d.templates);
        note_non_default("datasets", &self.datasets, &d.datasets);
    }

    /// Check everything that can be checked before touching any data.
    pub fn validate(&self) -> Result<()> {
        if self.n_vals_used == 0 {
            return Err(JumpRrError::ZeroTopCount.into());
        }
        for placeholder in [WELL_PLACEHOLDER, SITE_PLACEHOLDER] {
            if !self.templates.image_url.contains(placeholder) {
                return Err(JumpRrError::MissingPlaceholder {
                    template: self.templates.image_url.clone(),
                    placeholder,
                }
                .into());
            }
        }
        if !self.templates.external_url.contains("{id}") {
            return Err(JumpRrError::MissingPlaceholder {
                template: self.templates.external_url.clone(),
                placeholder: "{id}",
            }
            .into());
        }
        let bounded = matches!(self.metric, DistanceMetric::Cosine | DistanceMetric::Correlation);
        if self.dist_as_sim && !bounded {
            warn!(
                "dist_as_sim assumes distances in [0, 2]; {} distances are unbounded",
                self.metric
            );
        }
        if self.datasets.is_empty() {
            bail!("no datasets configured");
        }
        if let Some(dup) = self.datasets.iter().map(|d| &d.name).duplicates().next() {
            bail!("dataset {dup:?} is configured twice");
        }
        if let Some(d) = self.datasets.iter().find(|d| d.n_sites == 0) {
            bail!("dataset {:?} has no imaging sites", d.name);
        }
        Ok(())
    }

    /// Keep only the named datasets; all of them when `names` is empty.
    pub fn select_datasets(&self, names: &[String]) -> Result<Vec<&DatasetConfig>> {
        if names.is_empty() {
            return Ok(self.datasets.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.datasets
                    .iter()
                    .find(|d| &d.name == name)
                    .with_context(|| format!("unknown dataset {name:?}"))
            })
            .collect()
    }
}
