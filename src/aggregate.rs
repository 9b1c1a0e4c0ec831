//! Combination of independent replica estimates into a mean and standard error.

use crate::errors::*;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// One replica's estimate of a scalar quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaEstimate {
    /// Identifier of the replica within its case
    pub replica_id: String,
    /// The estimate
    pub value: f64,
}

impl ReplicaEstimate {
    /// Create a new replica estimate
    pub fn new(replica_id: impl Into<String>, value: f64) -> Self {
        Self {
            replica_id: replica_id.into(),
            value,
        }
    }
}

/// Per-replica estimates of the same physical quantity for one simulation-design case.
///
/// Insertion order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSet {
    estimates: Vec<ReplicaEstimate>,
}

impl ReplicaSet {
    /// An empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a replica's estimate
    pub fn push(&mut self, estimate: ReplicaEstimate) {
        self.estimates.push(estimate);
    }

    /// Number of replicas in the set
    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    /// The estimates in the set
    pub fn estimates(&self) -> &[ReplicaEstimate] {
        &self.estimates
    }

    /// Reduce the set to its mean and standard error of the mean.
    ///
    /// # Errors
    ///
    /// - `InsufficientData` if the set is empty; the mean of nothing is missing, not zero.
    /// - `MalformedInput` if an estimate is not finite.
    pub fn aggregate(&self) -> Result<AggregateResult> {
        if let Some(bad) = self.estimates.iter().find(|e| !e.value.is_finite()) {
            return Err(AnalysisError::malformed(
                bad.replica_id.clone(),
                0,
                format!("replica estimate {} is not finite", bad.value),
            ));
        }

        // Sorted so that the floating point reduction is independent of replica order
        let mut values: Vec<f64> = self.estimates.iter().map(|e| e.value).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        let values = Array1::from(values);

        let mean = values.mean().ok_or_else(|| {
            AnalysisError::InsufficientData("no replicas to aggregate".to_string())
        })?;

        let replica_count = values.len();
        let sem = if replica_count >= 2 {
            Some(values.std(1.0) / (replica_count as f64).sqrt())
        } else {
            None
        };

        Ok(AggregateResult {
            mean,
            sem,
            replica_count,
        })
    }
}

impl std::iter::FromIterator<ReplicaEstimate> for ReplicaSet {
    fn from_iter<I: IntoIterator<Item = ReplicaEstimate>>(iter: I) -> Self {
        Self {
            estimates: iter.into_iter().collect(),
        }
    }
}

impl Extend<ReplicaEstimate> for ReplicaSet {
    fn extend<I: IntoIterator<Item = ReplicaEstimate>>(&mut self, iter: I) {
        self.estimates.extend(iter)
    }
}

/// Mean and standard error of a replica set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Arithmetic mean over replicas
    pub mean: f64,
    /// Bessel-corrected standard error of the mean.
    ///
    /// `None` when only one replica contributed, since a single replica carries no information
    /// about dispersion.
    pub sem: Option<f64>,
    /// Number of replicas that contributed
    pub replica_count: usize,
}
