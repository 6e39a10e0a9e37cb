use crate::similarity::DistanceMetric;

/// Configuration and shape problems that abort a run before any output is written.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum JumpRrError {
    /// Not enough perturbations for `k` closest plus `k` farthest distinct matches.
    #[error(
        "{n_items} perturbations cannot provide {k} closest and {k} farthest matches each; \
         more than 2 * {k} + 1 are required"
    )]
    TooFewItems {
        /// Perturbations in the dataset.
        n_items: usize,
        /// Requested matches per side.
        k: usize,
    },

    /// `n_vals_used` is zero.
    #[error("the number of top and bottom matches (n_vals_used) must be positive")]
    ZeroTopCount,

    /// A required metadata column is absent from the input profiles.
    #[error("column {column:?} is missing from the profiles of dataset {dataset:?}")]
    MissingColumn {
        /// Dataset being processed.
        dataset: String,
        /// Missing column name.
        column: String,
    },

    /// A URL template lacks one of its placeholders.
    #[error("template {template:?} has no {placeholder} placeholder")]
    MissingPlaceholder {
        /// The template as configured.
        template: String,
        /// The placeholder it should contain.
        placeholder: &'static str,
    },

    /// A well profile holds NaN or an infinity.
    #[error("perturbation {id:?} has a non-finite value in feature {feature}")]
    NonFiniteFeature {
        /// Perturbation identifier.
        id: String,
        /// Feature column name.
        feature: String,
    },

    /// A vector has no direction under the metric (zero norm or zero variance).
    #[error("perturbation {id:?} has a degenerate consensus vector for the {metric} metric")]
    DegenerateVector {
        /// Perturbation identifier, or its position when unnamed.
        id: String,
        /// Metric being computed.
        metric: DistanceMetric,
    },

    /// Per-perturbation tables disagree on the number of perturbations.
    #[error("{records} perturbation records do not line up with {rows} consensus rows")]
    MisalignedRecords {
        /// Number of records.
        records: usize,
        /// Number of rows in the companion table.
        rows: usize,
    },

    /// Neighbor indices and distances have different shapes, or the matrix is not square.
    #[error("neighbor table has {found} columns per row but {expected} were expected")]
    NeighborWidth {
        /// Expected width.
        expected: usize,
        /// Width found.
        found: usize,
    },

    /// A neighbor position does not name a perturbation.
    #[error("neighbor index {index} is out of range for {n_items} perturbations")]
    NeighborOutOfRange {
        /// Offending position.
        index: usize,
        /// Number of perturbations.
        n_items: usize,
    },

    /// An image cycle was advanced a different number of times than rows were emitted.
    #[error("{what} was drawn {actual} times for {expected} emitted rows")]
    CycleDrawMismatch {
        /// Which cycle.
        what: String,
        /// Draws implied by the emitted rows.
        expected: usize,
        /// Draws taken.
        actual: usize,
    },

    /// A cycle was built from no values.
    #[error("cannot cycle over an empty list of values")]
    EmptyCycle,

    /// The compute backend could not be set up.
    #[error("compute device unavailable: {0}")]
    DeviceUnavailable(String),
}
