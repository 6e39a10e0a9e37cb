//! Translate perturbation identifiers into gene/compound names and external links.

use crate::match_table::RawMatch;
use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Restricts a lookup to the rows whose `column` equals `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    /// Column to filter on.
    pub column: String,
    /// Required value.
    pub value: String,
}

impl fmt::Display for Predicate {
    /// The SQL fragment appended to the lookup's WHERE clause.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AND {} = '{}'", self.column, self.value)
    }
}

/// A request for `(identifier, standard name, external id)` of every identifier in `ids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    /// Identifiers to translate.
    pub ids: Vec<String>,
    /// Column the identifiers are matched against.
    pub input_column: String,
    /// Identifier, standard name and external id columns, in that order.
    pub output_columns: [String; 3],
    /// Row filter, usually the dataset's plate type.
    pub predicate: Predicate,
}

impl LookupRequest {
    /// Comma separated output column spec.
    pub fn output_spec(&self) -> String {
        self.output_columns.join(",")
    }
}

/// One answer of a metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRecord {
    /// Identifier as requested.
    pub id: String,
    /// Gene or compound name.
    pub standard_name: String,
    /// Identifier in the external resource.
    pub external_id: String,
}

/// Source of gene/compound metadata.
pub trait MetadataLookup {
    /// Records for the requested identifiers that pass the predicate. Identifiers
    /// without a record are simply absent from the answer.
    fn query(&self, request: &LookupRequest) -> Result<Vec<LookupRecord>>;
}

/// Knows nothing; every identifier passes through untranslated.
pub struct NoLookup;

impl MetadataLookup for NoLookup {
    fn query(&self, _request: &LookupRequest) -> Result<Vec<LookupRecord>> {
        Ok(Vec::new())
    }
}

/// A metadata table loaded from a CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvLookup {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvLookup {
    /// Load the whole table into memory.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).with_context(|| path.display().to_string())?;
        let headers = reader.headers()?.iter().map(String::from).collect();
        let rows = reader
            .records()
            .map(|r| -> Result<Vec<String>> { Ok(r?.iter().map(String::from).collect()) })
            .collect::<Result<Vec<_>>>()
            .with_context(|| path.display().to_string())?;
        Ok(CsvLookup { headers, rows })
    }

    fn column(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("metadata table has no column {name:?}"))
    }
}

impl MetadataLookup for CsvLookup {
    fn query(&self, request: &LookupRequest) -> Result<Vec<LookupRecord>> {
        let input = self.column(&request.input_column)?;
        let filter = self.column(&request.predicate.column)?;
        let [id, name, external] = &request.output_columns;
        let (id, name, external) = (self.column(id)?, self.column(name)?, self.column(external)?);

        let wanted: std::collections::HashSet<&str> =
            request.ids.iter().map(String::as_str).collect();
        Ok(self
            .rows
            .iter()
            .filter(|row| row[filter] == request.predicate.value)
            .filter(|row| wanted.contains(row[input].as_str()))
            .map(|row| LookupRecord {
                id: row[id].clone(),
                standard_name: row[name].clone(),
                external_id: row[external].clone(),
            })
            .collect())
    }
}

/// Identifier translations of one dataset.
#[derive(Debug, Clone, Default)]
pub struct GeneMapping {
    names: HashMap<String, String>,
    links: HashMap<String, String>,
}

impl GeneMapping {
    /// `external_url` holds an `{id}` placeholder for the external id.
    pub fn new(records: Vec<LookupRecord>, external_url: &str, external_label: &str) -> Self {
        let mut mapping = GeneMapping::default();
        for r in records {
            let url = external_url.replace("{id}", &r.external_id);
            mapping.links.insert(
                r.id.clone(),
                json!({ "href": url, "label": external_label }).to_string(),
            );
            mapping.names.insert(r.id, r.standard_name);
        }
        mapping
    }

    /// Standard name of `id`, or `id` itself when unknown.
    pub fn standard_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.names.get(id).map_or(id, String::as_str)
    }

    /// External resource link of `id`, or `id` itself when unknown.
    pub fn external_link<'a>(&'a self, id: &'a str) -> &'a str {
        self.links.get(id).map_or(id, String::as_str)
    }

    /// True if `id` has a translation.
    pub fn contains(&self, id: &str) -> bool {
        self.names.contains_key(id)
    }
}

/// A match ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMatch {
    /// Subject name, or its identifier when untranslated.
    pub standard_name: String,
    /// Match name, or its identifier when untranslated.
    pub matched: String,
    /// Image cell showing the subject.
    pub subject_image: String,
    /// Image cell showing the match.
    pub match_image: String,
    /// Raw distance; converted for display when the table is laid out.
    pub distance: f64,
    /// External link cell of the match, or its identifier when untranslated.
    pub match_resources: String,
    /// Raw subject identifier.
    pub id: String,
}

/// Distinct subject identifiers, in first-appearance order.
pub fn distinct_subjects(matches: &[RawMatch]) -> Vec<String> {
    matches.iter().map(|m| m.subject.clone()).unique().collect()
}

/// Query `lookup` for every subject of `matches` and build the mapping.
pub fn fetch_mapping(
    lookup: &dyn MetadataLookup,
    request: &LookupRequest,
    external_url: &str,
    external_label: &str,
) -> Result<GeneMapping> {
    let records = lookup.query(request)?;
    let mapping = GeneMapping::new(records, external_url, external_label);
    let missing = request.ids.iter().filter(|id| !mapping.contains(id)).count();
    info!(
        "looked up {} identifiers ({}) {}: {} translated",
        request.ids.len(),
        request.output_spec(),
        request.predicate,
        request.ids.len() - missing
    );
    if missing > 0 {
        warn!("{missing} identifiers have no metadata and are kept untranslated");
    }
    Ok(mapping)
}

/// Translate subject and match identifiers. Nothing is dropped: unknown identifiers
/// keep their raw value.
pub fn enrich(matches: Vec<RawMatch>, mapping: &GeneMapping) -> Vec<PublishedMatch> {
    matches
        .into_iter()
        .map(|m| PublishedMatch {
            standard_name: mapping.standard_name(&m.subject).to_string(),
            matched: mapping.standard_name(&m.matched).to_string(),
            match_resources: mapping.external_link(&m.matched).to_string(),
            subject_image: m.subject_image,
            match_image: m.match_image,
            distance: m.distance,
            id: m.subject,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const NCBI: &str = "https://www.ncbi.nlm.nih.gov/gene/{id}";

    fn raw(subject: &str, matched: &str) -> RawMatch {
        RawMatch {
            subject: subject.to_string(),
            matched: matched.to_string(),
            distance: 0.25,
            subject_image: "s".to_string(),
            match_image: "m".to_string(),
        }
    }

    fn request(ids: &[&str], dataset: &str) -> LookupRequest {
        LookupRequest {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            input_column: "JCP2022".to_string(),
            output_columns: [
                "JCP2022".to_string(),
                "standard_key".to_string(),
                "NCBI_Gene_ID".to_string(),
            ],
            predicate: Predicate {
                column: "plate_type".to_string(),
                value: dataset.to_string(),
            },
        }
    }

    #[test]
    fn test_request_rendering() {
        let r = request(&["JCP2022_1"], "crispr");
        assert_eq!(r.output_spec(), "JCP2022,standard_key,NCBI_Gene_ID");
        assert_eq!(r.predicate.to_string(), "AND plate_type = 'crispr'");
    }

    #[test]
    fn test_missing_mapping_passes_through() {
        let mapping = GeneMapping::new(
            vec![LookupRecord {
                id: "JCP2022_1".to_string(),
                standard_name: "RAB30".to_string(),
                external_id: "27314".to_string(),
            }],
            NCBI,
            "External",
        );
        let out = enrich(
            vec![raw("JCP2022_1", "JCP2022_2"), raw("JCP2022_2", "JCP2022_1")],
            &mapping,
        );
        assert_eq!(out.len(), 2);

        assert_eq!(out[0].standard_name, "RAB30");
        assert_eq!(out[0].matched, "JCP2022_2");
        assert_eq!(out[0].match_resources, "JCP2022_2");
        assert_eq!(out[0].id, "JCP2022_1");

        assert_eq!(out[1].standard_name, "JCP2022_2");
        assert_eq!(out[1].matched, "RAB30");
        assert_eq!(out[1].id, "JCP2022_2");
        let link: serde_json::Value = serde_json::from_str(&out[1].match_resources).unwrap();
        assert_eq!(
            link,
            json!({"href": "https://www.ncbi.nlm.nih.gov/gene/27314", "label": "External"})
        );
    }

    #[test]
    fn test_distinct_subjects_keeps_order() {
        let matches = vec![raw("b", "a"), raw("b", "c"), raw("a", "b"), raw("c", "a")];
        assert_eq!(distinct_subjects(&matches), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_csv_lookup_filters_by_predicate() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "JCP2022,standard_key,NCBI_Gene_ID,plate_type")?;
        writeln!(file, "JCP2022_1,RAB30,27314,crispr")?;
        writeln!(file, "JCP2022_1,RAB30-orf,27314,orf")?;
        writeln!(file, "JCP2022_3,MYT1,4661,crispr")?;
        file.flush()?;

        let lookup = CsvLookup::from_path(file.path())?;
        let records = lookup.query(&request(&["JCP2022_1", "JCP2022_2"], "crispr"))?;
        assert_eq!(
            records,
            vec![LookupRecord {
                id: "JCP2022_1".to_string(),
                standard_name: "RAB30".to_string(),
                external_id: "27314".to_string(),
            }]
        );

        let mut bad = request(&["JCP2022_1"], "crispr");
        bad.predicate.column = "source".to_string();
        assert!(lookup.query(&bad).is_err());
        Ok(())
    }

    #[test]
    fn test_no_lookup_translates_nothing() -> Result<()> {
        let mapping = fetch_mapping(&NoLookup, &request(&["JCP2022_9"], "orf"), NCBI, "External")?;
        assert_eq!(mapping.standard_name("JCP2022_9"), "JCP2022_9");
        Ok(())
    }
}
