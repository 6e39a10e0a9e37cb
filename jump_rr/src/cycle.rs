//! Endless round-robin sequences used to pick a different example image every time a
//! perturbation is shown again.

use crate::errors::JumpRrError;

/// Repeats a non-empty list of values in order, forever.
///
/// The number of values handed out is tracked so callers can check that every draw
/// corresponds to exactly one emitted row.
#[derive(Debug, Clone)]
pub struct Cycle<T> {
    values: Vec<T>,
    pos: usize,
    draws: usize,
}

impl<T: Clone> Cycle<T> {
    /// A fresh cycle starting at the first value.
    pub fn new(values: Vec<T>) -> Result<Self, JumpRrError> {
        if values.is_empty() {
            return Err(JumpRrError::EmptyCycle);
        }
        Ok(Cycle {
            values,
            pos: 0,
            draws: 0,
        })
    }

    /// Next value; never runs out.
    pub fn draw(&mut self) -> T {
        let value = self.values[self.pos].clone();
        self.pos = (self.pos + 1) % self.values.len();
        self.draws += 1;
        value
    }

    /// Number of values drawn so far.
    pub fn draws(&self) -> usize {
        self.draws
    }

    /// Number of distinct positions before the sequence repeats.
    pub fn period(&self) -> usize {
        self.values.len()
    }
}

impl<T: Clone> Iterator for Cycle<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        Some(self.draw())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}

/// Image site numbers `1..=n_sites`, repeating.
pub fn site_cycle(n_sites: u32) -> Result<Cycle<u32>, JumpRrError> {
    Cycle::new((1..=n_sites).collect())
}

/// The site cycles of one dataset: one shared by all subject images and one per
/// perturbation for its appearances as a match.
///
/// Construct a new instance for every dataset.
#[derive(Debug, Clone)]
pub struct SiteCycles {
    pub(crate) subjects: Cycle<u32>,
    pub(crate) matches: Vec<Cycle<u32>>,
}

impl SiteCycles {
    /// Site cycles for `n_items` perturbations imaged at `n_sites` sites per well.
    pub fn new(n_items: usize, n_sites: u32) -> Result<Self, JumpRrError> {
        let subjects = site_cycle(n_sites)?;
        Ok(SiteCycles {
            matches: vec![subjects.clone(); n_items],
            subjects,
        })
    }

    /// Use explicit cycles, e.g. a deterministic sequence in tests.
    pub fn from_parts(subjects: Cycle<u32>, matches: Vec<Cycle<u32>>) -> Self {
        SiteCycles { subjects, matches }
    }

    /// Draws taken so far from the shared subject cycle.
    pub fn subject_draws(&self) -> usize {
        self.subjects.draws()
    }

    /// Draws taken so far from the match cycle of perturbation `item`.
    pub fn match_draws(&self, item: usize) -> usize {
        self.matches[item].draws()
    }
}
