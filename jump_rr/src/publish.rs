//! Lay out enriched matches in publish order and write them.

use crate::config::ColumnNames;
use crate::enrich::PublishedMatch;
use crate::similarity::distance_to_similarity;
use anyhow::{Context, Result};
use log::info;
use profile_io::{Column, ColumnTable, TableWriter};
use std::path::{Path, PathBuf};

/// Columns in publish order: standard name, match, subject example, match example,
/// similarity, external link, raw identifier.
pub fn match_table(
    matches: &[PublishedMatch],
    names: &ColumnNames,
    dist_as_sim: bool,
) -> Result<ColumnTable> {
    let strings = |f: fn(&PublishedMatch) -> &String| -> Vec<String> {
        matches.iter().map(|m| f(m).clone()).collect()
    };
    let scores = matches
        .iter()
        .map(|m| {
            if dist_as_sim {
                distance_to_similarity(m.distance)
            } else {
                m.distance
            }
        })
        .collect();
    ColumnTable::new(vec![
        Column::str(&names.standard_name, strings(|m| &m.standard_name)),
        Column::str(&names.matched, strings(|m| &m.matched)),
        Column::str(names.subject_example(), strings(|m| &m.subject_image)),
        Column::str(&names.match_example, strings(|m| &m.match_image)),
        Column::float64(&names.similarity, scores),
        Column::str(&names.match_resources, strings(|m| &m.match_resources)),
        Column::str(&names.id_short, strings(|m| &m.id)),
    ])
}

/// Write `<output_dir>/<dataset>.parquet`, creating the directory if needed.
pub fn write_matches(table: &ColumnTable, output_dir: &Path, dataset: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).with_context(|| output_dir.display().to_string())?;
    let path = output_dir.join(format!("{dataset}.parquet"));
    TableWriter::default().write(table, &path)?;
    info!("wrote {} matches to {}", table.num_rows(), path.display());
    Ok(path)
}
