//! One pass over each configured dataset: load, reduce, rank, translate, write.

use crate::config::{DatasetConfig, RunConfig};
use crate::consensus::ConsensusProfiles;
use crate::cycle::SiteCycles;
use crate::enrich::{
    distinct_subjects, enrich, fetch_mapping, LookupRequest, MetadataLookup, Predicate,
};
use crate::match_table::{build_matches, ImageCell};
use crate::publish::{match_table, write_matches};
use crate::similarity::{check_top_count, PairwiseBackend};
use anyhow::{Context, Result};
use log::info;
use profile_io::{ColumnTable, ProfileTable};
use std::path::PathBuf;

/// Runs datasets through a backend and a metadata lookup with one configuration.
pub struct Pipeline<'a> {
    config: &'a RunConfig,
    backend: &'a dyn PairwiseBackend,
    lookup: &'a dyn MetadataLookup,
}

impl<'a> Pipeline<'a> {
    /// Borrow the run's configuration, compute device and metadata source.
    pub fn new(
        config: &'a RunConfig,
        backend: &'a dyn PairwiseBackend,
        lookup: &'a dyn MetadataLookup,
    ) -> Self {
        Pipeline {
            config,
            backend,
            lookup,
        }
    }

    /// Process datasets one after the other, returning the written files.
    pub fn run(&self, datasets: &[&DatasetConfig]) -> Result<Vec<PathBuf>> {
        info!("computing on {}", self.backend.describe());
        datasets.iter().map(|d| self.run_dataset(d)).collect()
    }

    /// Read one dataset's profiles, process them and write its match table.
    pub fn run_dataset(&self, dataset: &DatasetConfig) -> Result<PathBuf> {
        let path = dataset.profiles_path(&self.config.input_dir);
        let profiles = ProfileTable::read_parquet(&path)
            .with_context(|| format!("loading {} profiles", dataset.name))?;
        let table = self.process(dataset, &profiles)?;
        write_matches(&table, &self.config.output_dir, &dataset.name)
    }

    /// Everything but file I/O.
    pub fn process(&self, dataset: &DatasetConfig, profiles: &ProfileTable) -> Result<ColumnTable> {
        let config = self.config;
        let columns = &config.columns;
        let k = config.n_vals_used;

        let consensus = ConsensusProfiles::from_profiles(
            &dataset.name,
            profiles,
            &columns.id_column(),
            &columns.well_key,
            &config.templates.image_url,
            config.reduction,
        )?;
        check_top_count(consensus.len(), k)
            .with_context(|| format!("dataset {}", dataset.name))?;

        let ids = consensus.ids();
        let distances = self
            .backend
            .pairwise_distances(consensus.features(), config.metric, &ids)?;
        let neighbors = self.backend.select_neighbors(distances.view(), k)?;
        drop(distances);

        let mut sites = SiteCycles::new(consensus.len(), dataset.n_sites)?;
        let image = ImageCell {
            width: config.templates.image_width,
        };
        let matches = build_matches(&consensus, &neighbors, &mut sites, image)?;
        info!(
            "{}: {} matches for {} perturbations",
            dataset.name,
            matches.len(),
            consensus.len()
        );

        let request = LookupRequest {
            ids: distinct_subjects(&matches),
            input_column: columns.id_short.clone(),
            output_columns: [
                columns.id_short.clone(),
                columns.lookup_name.clone(),
                columns.lookup_external_id.clone(),
            ],
            predicate: Predicate {
                column: columns.lookup_filter.clone(),
                value: dataset.name.clone(),
            },
        };
        let mapping = fetch_mapping(
            self.lookup,
            &request,
            &config.templates.external_url,
            &config.templates.external_label,
        )?;
        let published = enrich(matches, &mapping);
        match_table(&published, columns, config.dist_as_sim)
    }
}
