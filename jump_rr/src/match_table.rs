//! Flatten neighbor tables into one row per (subject, match) pair with example images.

use crate::consensus::{ConsensusProfiles, SITE_PLACEHOLDER};
use crate::cycle::{Cycle, SiteCycles};
use crate::errors::JumpRrError;
use crate::similarity::Neighbors;
use anyhow::Result;
use serde_json::json;

/// A match before any identifier translation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMatch {
    /// Identifier of the perturbation the row is about.
    pub subject: String,
    /// Identifier of the neighbor.
    pub matched: String,
    /// Raw distance between the two.
    pub distance: f64,
    /// Image cell showing the subject.
    pub subject_image: String,
    /// Image cell showing the match.
    pub match_image: String,
}

/// Renders an image URL as the JSON cell the explorer displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCell {
    /// Display width in pixels.
    pub width: u32,
}

impl ImageCell {
    /// JSON with the image source, its click-through link and the display width.
    pub fn render(&self, url: &str) -> String {
        json!({ "img_src": url, "href": url, "width": self.width }).to_string()
    }
}

fn fill_site(template: &str, site: u32) -> String {
    template.replace(SITE_PLACEHOLDER, &site.to_string())
}

/// Build the match rows of one dataset, all `2k` rows of subject 0 first.
///
/// Subject images draw from each subject's template cycle and the shared subject site
/// cycle. Match images then draw, in row order, from the matched perturbation's
/// template cycle and its own site cycle. Template cycles are shared by both passes.
pub fn build_matches(
    profiles: &ConsensusProfiles,
    neighbors: &Neighbors,
    sites: &mut SiteCycles,
    image: ImageCell,
) -> Result<Vec<RawMatch>> {
    let n_items = profiles.len();
    if neighbors.n_subjects() != n_items || sites.matches.len() != n_items {
        return Err(JumpRrError::MisalignedRecords {
            records: n_items,
            rows: neighbors.n_subjects(),
        }
        .into());
    }
    let per_subject = neighbors.per_subject();
    let records = profiles.records();

    let mut templates = records
        .iter()
        .map(|p| Cycle::new(p.image_templates.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let subject_draws_before = sites.subject_draws();
    let match_draws_before: Vec<usize> = (0..n_items).map(|i| sites.match_draws(i)).collect();

    let mut subject_images = Vec::with_capacity(n_items * per_subject);
    for tmpl in &mut templates {
        for _ in 0..per_subject {
            let url = fill_site(&tmpl.draw(), sites.subjects.draw());
            subject_images.push(image.render(&url));
        }
    }

    let mut appearances = vec![0usize; n_items];
    let rows: Vec<RawMatch> = neighbors
        .iter()
        .zip(subject_images)
        .map(|((subject, matched, distance), subject_image)| {
            appearances[matched] += 1;
            let url = fill_site(&templates[matched].draw(), sites.matches[matched].draw());
            RawMatch {
                subject: records[subject].id.clone(),
                matched: records[matched].id.clone(),
                distance,
                subject_image,
                match_image: image.render(&url),
            }
        })
        .collect();

    audit(
        "subject site cycle",
        n_items * per_subject,
        sites.subject_draws() - subject_draws_before,
    )?;
    for (i, (&seen, template)) in appearances.iter().zip(&templates).enumerate() {
        audit(
            &format!("site cycle of {}", records[i].id),
            seen,
            sites.match_draws(i) - match_draws_before[i],
        )?;
        audit(
            &format!("image templates of {}", records[i].id),
            per_subject + seen,
            template.draws(),
        )?;
    }
    Ok(rows)
}

fn audit(what: &str, expected: usize, actual: usize) -> Result<(), JumpRrError> {
    if expected != actual {
        return Err(JumpRrError::CycleDrawMismatch {
            what: what.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
