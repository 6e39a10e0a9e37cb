//! End-to-end runs on four perturbations pointing to the compass directions.
//!
//! Cosine distances are 0 to itself, 1 to both neighbors at 90 degrees and 2 to the
//! opposite one, so with k = 1 every perturbation's closest match is the lower-indexed
//! orthogonal one (similarity 0) and its farthest match is the opposite one
//! (similarity -1).

use crate::config::{DatasetConfig, RunConfig};
use crate::enrich::{CsvLookup, NoLookup};
use crate::pipeline::Pipeline;
use crate::similarity::CpuBackend;
use crate::JumpRrError;
use anyhow::Result;
use pretty_assertions::assert_eq;
use profile_io::{read_table, Column, ColumnTable, ColumnValues, ProfileTable, TableWriter};
use std::io::Write;
use std::path::Path;

fn s(v: &[&str]) -> Vec<String> {
    v.iter().map(|x| x.to_string()).collect()
}

/// Two wells per perturbation; medians land exactly on the unit vectors.
fn compass_columns() -> Vec<Column> {
    vec![
        Column::str(
            "Metadata_JCP2022",
            s(&[
                "JCP2022_A", "JCP2022_B", "JCP2022_C", "JCP2022_D", "JCP2022_A", "JCP2022_B",
                "JCP2022_C", "JCP2022_D",
            ]),
        ),
        Column::str("Metadata_Source", s(&["source_1"; 8])),
        Column::str(
            "Metadata_Plate",
            s(&["P1", "P1", "P1", "P1", "P2", "P2", "P2", "P2"]),
        ),
        Column::str(
            "Metadata_Well",
            s(&["A01", "A02", "A03", "A04", "A01", "A02", "A03", "A04"]),
        ),
        Column::float64("x", vec![0.5, 0.0, -1.0, 0.0, 1.5, 0.0, -1.0, 0.0]),
        Column::float64("y", vec![0.0, 1.0, 0.0, -2.0, 0.0, 1.0, 0.0, -4.0]),
    ]
}

fn compass_profiles() -> ProfileTable {
    let columns = compass_columns();
    let mut metadata = Vec::new();
    let mut features = Vec::new();
    for col in &columns {
        match &col.values {
            ColumnValues::Str(v) => metadata.push((col.name.clone(), v.clone())),
            ColumnValues::Float64(v) => features.push(v.clone()),
        }
    }
    let values = (0..8).flat_map(|r| features.iter().map(move |f| f[r])).collect();
    ProfileTable::new(metadata, s(&["x", "y"]), values).unwrap()
}

fn config(root: &Path) -> RunConfig {
    RunConfig {
        input_dir: root.join("profiles"),
        output_dir: root.join("databases"),
        n_vals_used: 1,
        datasets: vec![DatasetConfig::new("crispr", "compass")],
        ..Default::default()
    }
}

fn strings<'a>(table: &'a ColumnTable, name: &str) -> &'a [String] {
    match table.column(name) {
        Some(ColumnValues::Str(v)) => v,
        other => panic!("{name}: {other:?}"),
    }
}

fn floats<'a>(table: &'a ColumnTable, name: &str) -> &'a [f64] {
    match table.column(name) {
        Some(ColumnValues::Float64(v)) => v,
        other => panic!("{name}: {other:?}"),
    }
}

#[test]
fn test_compass_matches() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path());
    let backend = CpuBackend::new(Some(2))?;
    let table = Pipeline::new(&config, &backend, &NoLookup)
        .process(&config.datasets[0], &compass_profiles())?;

    assert_eq!(table.num_rows(), 4 * 2);
    assert_eq!(
        strings(&table, "JCP2022"),
        s(&[
            "JCP2022_A", "JCP2022_A", "JCP2022_B", "JCP2022_B", "JCP2022_C", "JCP2022_C",
            "JCP2022_D", "JCP2022_D",
        ])
    );
    assert_eq!(
        strings(&table, "Match"),
        s(&[
            "JCP2022_B", "JCP2022_C", "JCP2022_A", "JCP2022_D", "JCP2022_B", "JCP2022_A",
            "JCP2022_A", "JCP2022_B",
        ])
    );
    assert_eq!(
        floats(&table, "Similarity"),
        &[0.0, -1.0, 0.0, -1.0, 0.0, -1.0, 0.0, -1.0]
    );
    // Untranslated: names and links fall back to the identifiers.
    assert_eq!(strings(&table, "Gene/Compound"), strings(&table, "JCP2022"));
    assert_eq!(strings(&table, "Match resources"), strings(&table, "Match"));

    let first: serde_json::Value =
        serde_json::from_str(&strings(&table, "Gene/Compound Example")[0])?;
    assert_eq!(
        first["img_src"],
        "https://phenaid.ardigen.com/static-jumpcpexplorer/images/source_1__P1__A01_1.jpg"
    );
    let second: serde_json::Value =
        serde_json::from_str(&strings(&table, "Gene/Compound Example")[1])?;
    assert_eq!(
        second["img_src"],
        "https://phenaid.ardigen.com/static-jumpcpexplorer/images/source_1__P2__A01_2.jpg"
    );
    Ok(())
}

#[test]
fn test_compass_raw_distances() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = RunConfig {
        dist_as_sim: false,
        ..config(dir.path())
    };
    let backend = CpuBackend::new(Some(1))?;
    let table = Pipeline::new(&config, &backend, &NoLookup)
        .process(&config.datasets[0], &compass_profiles())?;
    assert_eq!(
        floats(&table, "Similarity"),
        &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]
    );
    Ok(())
}

#[test]
fn test_too_few_perturbations_for_k() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = RunConfig {
        n_vals_used: 2,
        ..config(dir.path())
    };
    let backend = CpuBackend::new(Some(1))?;
    let err = Pipeline::new(&config, &backend, &NoLookup)
        .process(&config.datasets[0], &compass_profiles())
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<JumpRrError>(),
        Some(&JumpRrError::TooFewItems { n_items: 4, k: 2 })
    );
    Ok(())
}

#[test]
fn test_run_reads_and_writes_parquet() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path());

    let input = config.datasets[0].profiles_path(&config.input_dir);
    std::fs::create_dir_all(input.parent().unwrap())?;
    TableWriter::default().write(&ColumnTable::new(compass_columns())?, &input)?;

    let table_path = dir.path().join("babel.csv");
    let mut csv = std::fs::File::create(&table_path)?;
    writeln!(csv, "JCP2022,standard_key,NCBI_Gene_ID,plate_type")?;
    writeln!(csv, "JCP2022_A,RAB30,27314,crispr")?;
    writeln!(csv, "JCP2022_B,MYT1,4661,crispr")?;
    writeln!(csv, "JCP2022_C,PLK1,5347,crispr")?;
    writeln!(csv, "JCP2022_D,TP53,7157,orf")?;
    drop(csv);
    config.metadata_table = Some(table_path.clone());

    let lookup = CsvLookup::from_path(&table_path)?;
    let backend = CpuBackend::new(None)?;
    let datasets = config.select_datasets(&[])?;
    let written = Pipeline::new(&config, &backend, &lookup).run(&datasets)?;
    assert_eq!(written, vec![dir.path().join("databases").join("crispr.parquet")]);

    let table = read_table(&written[0])?;
    assert_eq!(
        table.names(),
        vec![
            "Gene/Compound",
            "Match",
            "Gene/Compound Example",
            "Match Example",
            "Similarity",
            "Match resources",
            "JCP2022"
        ]
    );
    assert_eq!(
        strings(&table, "Gene/Compound"),
        s(&["RAB30", "RAB30", "MYT1", "MYT1", "PLK1", "PLK1", "JCP2022_D", "JCP2022_D"])
    );
    assert_eq!(
        strings(&table, "Match"),
        s(&["MYT1", "PLK1", "RAB30", "JCP2022_D", "MYT1", "RAB30", "RAB30", "MYT1"])
    );
    let link: serde_json::Value = serde_json::from_str(&strings(&table, "Match resources")[0])?;
    assert_eq!(link["href"], "https://www.ncbi.nlm.nih.gov/gene/4661");
    assert_eq!(strings(&table, "Match resources")[3], "JCP2022_D");
    Ok(())
}
