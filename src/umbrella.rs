//! Unbiasing of umbrella sampling trajectories into a two-state free energy difference.

use crate::errors::*;
use crate::numeric::LogSumExp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A discretized order-parameter bin, as the tuple of integer order parameters the engine
/// records for each frame
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BinKey(pub Vec<i64>);

impl BinKey {
    /// The `i`th order parameter of this bin, if the bin has that many
    pub fn coordinate(&self, i: usize) -> Option<i64> {
        self.0.get(i).copied()
    }
}

impl From<Vec<i64>> for BinKey {
    fn from(v: Vec<i64>) -> Self {
        Self(v)
    }
}

impl fmt::Display for BinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, op) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", op)?;
        }
        write!(f, ")")
    }
}

/// The value of the reaction coordinate at one recorded simulation frame
#[derive(Debug, Clone, PartialEq)]
pub struct OrderParameterSample {
    /// Simulation time of the frame
    pub time: f64,
    /// Order-parameter bin the frame fell into
    pub bin: BinKey,
}

/// Biasing weights applied during umbrella sampling, stored as $\ln W(\mathrm{bin})$
#[derive(Debug, Clone, Default)]
pub struct BiasWeightTable {
    log_weights: HashMap<BinKey, f64>,
}

impl BiasWeightTable {
    /// Build a table from multiplicative weights $W$.
    ///
    /// Bins with $W \le 0$ are forbidden to the sampler; they are kept with a log weight of
    /// $-\infty$ so that a sample landing in one can be told apart from a missing bin.
    pub fn from_weights<I>(weights: I) -> Self
    where
        I: IntoIterator<Item = (BinKey, f64)>,
    {
        let log_weights = weights
            .into_iter()
            .map(|(bin, w)| {
                let log_w = if w > 0.0 { w.ln() } else { f64::NEG_INFINITY };
                (bin, log_w)
            })
            .collect();
        Self { log_weights }
    }

    /// Build a table from log weights $\ln W$
    pub fn from_log_weights<I>(log_weights: I) -> Self
    where
        I: IntoIterator<Item = (BinKey, f64)>,
    {
        Self {
            log_weights: log_weights.into_iter().collect(),
        }
    }

    /// $\ln W$ for a bin, or `None` if the table has no entry for it
    pub fn log_weight(&self, bin: &BinKey) -> Option<f64> {
        self.log_weights.get(bin).copied()
    }

    /// Number of bins in the table
    pub fn len(&self) -> usize {
        self.log_weights.len()
    }

    /// Does the table have no bins?
    pub fn is_empty(&self) -> bool {
        self.log_weights.is_empty()
    }
}

/// The two macrostates a binding trajectory is partitioned into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Macrostate {
    /// No inter-strand contacts
    Unbound,
    /// At least `bound_threshold` inter-strand contacts
    Bound,
}

/// Rule partitioning order-parameter bins into macrostates.
///
/// One coordinate of the bin key is inspected: it is `Unbound` iff it equals `unbound_value`
/// and `Bound` iff it is at least `bound_threshold`. Values in neither range are malformed
/// input, never assigned to the nearest state.
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct MacrostateClassification {
    /// Index into the bin key of the coordinate counting inter-strand contacts
    #[builder(default = "3")]
    pub coordinate_index: usize,

    /// Coordinate value of the unbound state
    #[builder(default = "0")]
    pub unbound_value: i64,

    /// Smallest coordinate value of the bound state
    #[builder(default = "1")]
    pub bound_threshold: i64,
}

impl MacrostateClassificationBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let unbound = self.unbound_value.unwrap_or(0);
        let bound = self.bound_threshold.unwrap_or(1);
        if bound <= unbound {
            return Err(format!(
                "bound_threshold ({}) must be greater than unbound_value ({})",
                bound, unbound
            ));
        }
        Ok(())
    }
}

impl Default for MacrostateClassification {
    fn default() -> Self {
        Self {
            coordinate_index: 3,
            unbound_value: 0,
            bound_threshold: 1,
        }
    }
}

impl MacrostateClassification {
    /// Get a new builder for the `MacrostateClassification` struct
    pub fn builder() -> MacrostateClassificationBuilder {
        MacrostateClassificationBuilder::default()
    }

    /// Classify a bin, or explain why it cannot be classified
    pub fn classify(&self, bin: &BinKey) -> std::result::Result<Macrostate, String> {
        let value = bin.coordinate(self.coordinate_index).ok_or_else(|| {
            format!(
                "bin {} has no coordinate at index {}",
                bin, self.coordinate_index
            )
        })?;

        if value == self.unbound_value {
            Ok(Macrostate::Unbound)
        } else if value >= self.bound_threshold {
            Ok(Macrostate::Bound)
        } else {
            Err(format!(
                "order parameter {} of bin {} is neither unbound (== {}) nor bound (>= {})",
                value, bin, self.unbound_value, self.bound_threshold
            ))
        }
    }
}

/// A volume-dependent free energy difference from one replica, in units of $k_B T$.
///
/// The sign convention is $\Delta F = F_\mathrm{bound} - F_\mathrm{unbound}
/// = -(\ln Z_\mathrm{bound} - \ln Z_\mathrm{unbound})$, so a positive value means the bound
/// state is less probable than the unbound state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFreeEnergy {
    /// $\Delta F / k_B T$
    pub delta_f: f64,
    /// Log of the unbiased statistical weight of the unbound state
    pub log_z_unbound: f64,
    /// Log of the unbiased statistical weight of the bound state
    pub log_z_bound: f64,
    /// Number of frames classified as unbound
    pub unbound_samples: usize,
    /// Number of frames classified as bound
    pub bound_samples: usize,
}

/// Importance-sampling estimator that removes the umbrella bias from a trajectory.
///
/// Each frame in bin $b$ contributes $1 / W(b)$ to the unbiased weight of its macrostate.
/// Frames are first histogrammed, then each bin contributes $\ln n_b - \ln W(b)$ and the bins
/// of a macrostate are combined with a log-sum-exp, so bias weights spanning hundreds of
/// natural-log units neither overflow nor underflow.
#[derive(Debug, Clone, Default)]
pub struct UnbiasingEstimator {
    classification: MacrostateClassification,
}

impl UnbiasingEstimator {
    /// Create an estimator using the given macrostate rule
    pub fn new(classification: MacrostateClassification) -> Self {
        Self { classification }
    }

    /// The macrostate rule in use
    pub fn classification(&self) -> &MacrostateClassification {
        &self.classification
    }

    /// Compute $\Delta F_\mathrm{raw}$ for one replica's samples.
    ///
    /// # Errors
    ///
    /// - `MalformedInput` if a sample cannot be classified, its bin has no weight, or its bin is
    ///   forbidden ($W \le 0$).
    /// - `InsufficientData` if either macrostate was never visited.
    pub fn estimate(
        &self,
        samples: &[OrderParameterSample],
        weights: &BiasWeightTable,
    ) -> Result<RawFreeEnergy> {
        let mut histograms: [BTreeMap<&BinKey, usize>; 2] = [BTreeMap::new(), BTreeMap::new()];

        for (i, sample) in samples.iter().enumerate() {
            let state = self
                .classification
                .classify(&sample.bin)
                .map_err(|reason| AnalysisError::malformed("sample", i + 1, reason))?;

            match weights.log_weight(&sample.bin) {
                None => {
                    return Err(AnalysisError::malformed(
                        "sample",
                        i + 1,
                        format!("bin {} is not in the bias weight table", sample.bin),
                    ))
                }
                Some(log_w) if log_w == f64::NEG_INFINITY => {
                    return Err(AnalysisError::malformed(
                        "sample",
                        i + 1,
                        format!("bin {} has non-positive bias weight", sample.bin),
                    ))
                }
                Some(_) => {}
            }

            *histograms[state as usize].entry(&sample.bin).or_insert(0) += 1;
        }

        let [unbound, bound] = &histograms;
        let log_z_unbound = log_partition(unbound, weights);
        let log_z_bound = log_partition(bound, weights);

        if log_z_unbound == f64::NEG_INFINITY {
            return Err(AnalysisError::InsufficientData(
                "no samples in the unbound state".to_string(),
            ));
        }
        if log_z_bound == f64::NEG_INFINITY {
            return Err(AnalysisError::InsufficientData(
                "no samples in the bound state".to_string(),
            ));
        }

        Ok(RawFreeEnergy {
            delta_f: -(log_z_bound - log_z_unbound),
            log_z_unbound,
            log_z_bound,
            unbound_samples: unbound.values().sum(),
            bound_samples: bound.values().sum(),
        })
    }
}

/// $\ln \sum_b n_b / W(b)$ over the bins of one macrostate
fn log_partition(histogram: &BTreeMap<&BinKey, usize>, weights: &BiasWeightTable) -> f64 {
    histogram
        .iter()
        .filter_map(|(bin, &count)| {
            weights
                .log_weight(bin)
                .map(|log_w| (count as f64).ln() - log_w)
        })
        .collect::<LogSumExp>()
        .value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bin(contacts: i64) -> BinKey {
        BinKey(vec![0, 0, 0, contacts, 0, 0, 0, 0])
    }

    fn samples(bins: &[i64]) -> Vec<OrderParameterSample> {
        bins.iter()
            .enumerate()
            .map(|(i, &c)| OrderParameterSample {
                time: i as f64,
                bin: bin(c),
            })
            .collect()
    }

    #[test]
    fn build_classification() {
        let rule = MacrostateClassification::builder().build().unwrap();
        assert_eq!(rule, MacrostateClassification::default());

        let err = MacrostateClassification::builder()
            .unbound_value(2)
            .bound_threshold(2)
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn classify_partitions_contacts() {
        let rule = MacrostateClassification::default();
        assert_eq!(rule.classify(&bin(0)), Ok(Macrostate::Unbound));
        assert_eq!(rule.classify(&bin(1)), Ok(Macrostate::Bound));
        assert_eq!(rule.classify(&bin(7)), Ok(Macrostate::Bound));
        assert!(rule.classify(&bin(-1)).is_err());
        assert!(rule.classify(&BinKey(vec![0, 0])).is_err());
    }

    #[test]
    fn uniform_weights_reduce_to_count_ratio() {
        let weights = BiasWeightTable::from_weights((0..4).map(|c| (bin(c), 3.7)));
        let trajectory = samples(&[0, 0, 0, 1, 2, 2, 3, 0, 1, 0]);

        let estimate = UnbiasingEstimator::default()
            .estimate(&trajectory, &weights)
            .unwrap();

        assert_eq!(estimate.unbound_samples, 5);
        assert_eq!(estimate.bound_samples, 5);
        assert_relative_eq!(estimate.delta_f, 0.0, epsilon = 1e-12);

        let trajectory = samples(&[0, 1, 1, 2]);
        let estimate = UnbiasingEstimator::default()
            .estimate(&trajectory, &weights)
            .unwrap();
        assert_relative_eq!(estimate.delta_f, -(3.0f64 / 1.0).ln(), epsilon = 1e-12);
    }

    #[test]
    fn bias_is_divided_out() {
        // Bound bin was boosted 100x, so its 100 samples represent one unit of weight
        let weights = BiasWeightTable::from_weights(vec![(bin(0), 1.0), (bin(1), 100.0)]);
        let mut bins = vec![0];
        bins.extend(std::iter::repeat(1).take(100));
        let estimate = UnbiasingEstimator::default()
            .estimate(&samples(&bins), &weights)
            .unwrap();
        assert_relative_eq!(estimate.delta_f, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn extreme_weights_stay_finite() {
        // Weights spanning ~700 natural-log units
        let weights = BiasWeightTable::from_log_weights(vec![
            (bin(0), -350.0),
            (bin(1), 350.0),
            (bin(2), 360.0),
        ]);
        let estimate = UnbiasingEstimator::default()
            .estimate(&samples(&[0, 1, 2, 2]), &weights)
            .unwrap();

        let log_z_bound = -350.0 + (1.0 + 2.0 * (-10.0f64).exp()).ln();
        assert!(estimate.delta_f.is_finite());
        assert_relative_eq!(estimate.log_z_unbound, 350.0, epsilon = 1e-12);
        assert_relative_eq!(estimate.log_z_bound, log_z_bound, epsilon = 1e-9);
        assert_relative_eq!(estimate.delta_f, 350.0 - log_z_bound, epsilon = 1e-9);
    }

    #[test]
    fn empty_macrostate_is_insufficient_data() {
        let weights = BiasWeightTable::from_weights((0..3).map(|c| (bin(c), 1.0)));
        let err = UnbiasingEstimator::default()
            .estimate(&samples(&[1, 2, 2]), &weights)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData(_)));

        let err = UnbiasingEstimator::default()
            .estimate(&samples(&[0, 0]), &weights)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData(_)));
    }

    #[test]
    fn unweighted_bin_is_malformed() {
        let weights = BiasWeightTable::from_weights(vec![(bin(0), 1.0), (bin(1), 1.0)]);
        let err = UnbiasingEstimator::default()
            .estimate(&samples(&[0, 1, 2]), &weights)
            .unwrap_err();
        match err {
            AnalysisError::MalformedInput { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn forbidden_bin_is_malformed() {
        let weights = BiasWeightTable::from_weights(vec![(bin(0), 1.0), (bin(1), 0.0)]);
        let err = UnbiasingEstimator::default()
            .estimate(&samples(&[0, 1]), &weights)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput { .. }));
    }

    #[test]
    fn unclassifiable_sample_is_malformed_not_dropped() {
        let weights = BiasWeightTable::from_weights((-1..3).map(|c| (bin(c), 1.0)));
        let err = UnbiasingEstimator::default()
            .estimate(&samples(&[0, 1, -1, 2]), &weights)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput { line: 3, .. }));
    }

    #[test]
    fn empty_bins_carry_no_mass() {
        let sparse = BiasWeightTable::from_weights(vec![(bin(0), 2.0), (bin(1), 5.0)]);
        let padded = BiasWeightTable::from_weights(vec![
            (bin(0), 2.0),
            (bin(1), 5.0),
            (bin(2), 0.5),
            (bin(3), 1e-30),
        ]);
        let trajectory = samples(&[0, 0, 1]);
        let a = UnbiasingEstimator::default()
            .estimate(&trajectory, &sparse)
            .unwrap();
        let b = UnbiasingEstimator::default()
            .estimate(&trajectory, &padded)
            .unwrap();
        assert_eq!(a, b);
    }
}
