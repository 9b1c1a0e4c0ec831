//! Synthetic systems with known answers, for testing the estimators end to end.
//!
//! Each system writes the same files the simulation engine would, so tests can exercise the
//! parsers, discovery and estimators together and compare against an analytical result.

use crate::discovery::{
    FfsFiles, UmbrellaFiles, FLUX_FILE, OUTCOME_FILE, TRACE_FILE, WEIGHTS_FILE,
};
use crate::errors::*;
use crate::umbrella::{BiasWeightTable, BinKey, OrderParameterSample};
use ndarray::{array, Array1};
use std::fs;
use std::path::Path;

/// Order parameters per bin in the files a test system writes
const BIN_WIDTH: usize = 8;
/// Column of the contact count in a bin
const CONTACT_COLUMN: usize = 3;

/// An umbrella sampling replica whose bound state is spread over several contact bins.
///
/// The unbound state is the single bin with zero contacts. Bound bin `i` has `i + 1` contacts.
///
/// # Examples
///
/// ```
/// use oxdna_analysis::testsystems::*;
/// use oxdna_analysis::umbrella::UnbiasingEstimator;
///
/// let system = TwoStateSystem::default();
/// let Sample { samples, weights } = system.sample();
/// let estimate = UnbiasingEstimator::default().estimate(&samples, &weights).unwrap();
/// assert!((estimate.delta_f - system.analytical_delta_f()).abs() < 1e-9);
/// ```
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct TwoStateSystem {
    /// Bias weight of the unbound bin
    #[builder(default = "1.0")]
    unbound_weight: f64,

    /// Bias weight of each bound bin
    #[builder(default = "array![10.0, 100.0, 1000.0]")]
    bound_weights: Array1<f64>,

    /// Frames recorded in the unbound bin
    #[builder(default = "200")]
    unbound_samples: usize,

    /// Frames recorded in each bound bin
    #[builder(default = "array![30, 20, 10]")]
    bound_samples: Array1<usize>,
}

impl TwoStateSystemBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let (Some(weights), Some(samples)) = (&self.bound_weights, &self.bound_samples) {
            if weights.len() != samples.len() {
                return Err(format!(
                    "bound_weights and bound_samples must have equal lengths (not {} and {})",
                    weights.len(),
                    samples.len()
                ));
            }
        }

        let weights = self.unbound_weight.iter().chain(self.bound_weights.iter().flatten());
        for w in weights {
            if !(w.is_finite() && *w > 0.0) {
                return Err(format!("bias weights must be positive, not {}", w));
            }
        }

        Ok(())
    }

    /// Build the test system
    pub fn build(&self) -> Result<TwoStateSystem> {
        Ok(self.build_inner()?)
    }
}

/// Samples drawn from a test system, together with the weights they were biased by
#[derive(Debug)]
pub struct Sample {
    /// Frames in the order they were recorded
    pub samples: Vec<OrderParameterSample>,
    /// Bias weight of every bin the system uses
    pub weights: BiasWeightTable,
}

impl TwoStateSystem {
    /// Get a new builder for the `TwoStateSystem` struct
    pub fn builder() -> TwoStateSystemBuilder {
        TwoStateSystemBuilder::default()
    }

    /// Bin with the given number of contacts
    pub fn bin(contacts: i64) -> BinKey {
        let mut ops = vec![0; BIN_WIDTH];
        ops[CONTACT_COLUMN] = contacts;
        BinKey(ops)
    }

    /// `(contacts, weight, samples)` of every bin, unbound first
    fn bins(&self) -> impl Iterator<Item = (i64, f64, usize)> + '_ {
        std::iter::once((0, self.unbound_weight, self.unbound_samples)).chain(
            self.bound_weights
                .iter()
                .zip(self.bound_samples.iter())
                .enumerate()
                .map(|(i, (&w, &n))| (i as i64 + 1, w, n)),
        )
    }

    /// Frames in bin order, one time unit apart
    pub fn sample(&self) -> Sample {
        let samples = self
            .bins()
            .flat_map(|(contacts, _, n)| std::iter::repeat(contacts).take(n))
            .enumerate()
            .map(|(t, contacts)| OrderParameterSample {
                time: t as f64,
                bin: Self::bin(contacts),
            })
            .collect();
        let weights =
            BiasWeightTable::from_weights(self.bins().map(|(c, w, _)| (Self::bin(c), w)));

        Sample { samples, weights }
    }

    /// $\Delta F_\mathrm{raw} = -\ln \frac{\sum_b n_b / W_b}{n_0 / W_0}$ with the sum over
    /// bound bins
    pub fn analytical_delta_f(&self) -> f64 {
        let z_unbound = self.unbound_samples as f64 / self.unbound_weight;
        let z_bound: f64 = self
            .bound_weights
            .iter()
            .zip(self.bound_samples.iter())
            .map(|(&w, &n)| n as f64 / w)
            .sum();
        -(z_bound.ln() - z_unbound.ln())
    }

    /// Write a replica directory holding a weight file and a single run's energy trace
    pub fn write_replica(&self, dir: &Path) -> Result<UmbrellaFiles> {
        let run = dir.join("run1");
        fs::create_dir_all(&run).map_err(|e| AnalysisError::io(&run, e))?;

        let mut weights = String::new();
        for (contacts, w, _) in self.bins() {
            weights.push_str(&format!("{} {}\n", row(&Self::bin(contacts)), w));
        }

        let mut trace = String::from("# t U U_bonded U_nonbonded U_ext ops\n");
        for sample in self.sample().samples {
            trace.push_str(&format!(
                "{} -1.25 -0.75 -0.5 0.0 {}\n",
                sample.time,
                row(&sample.bin)
            ));
        }

        let weights_path = dir.join(WEIGHTS_FILE);
        let trace_path = run.join(TRACE_FILE);
        write(&weights_path, &weights)?;
        write(&trace_path, &trace)?;

        Ok(UmbrellaFiles {
            weights: weights_path,
            traces: vec![trace_path],
        })
    }
}

impl Default for TwoStateSystem {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("TwoStateSystem should not fail with default params")
    }
}

/// One replica of an FFS calculation with fixed counts at every stage.
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct FfsSystem {
    /// First-crossing events in the flux run
    #[builder(default = "50")]
    pub crossings: u64,

    /// Simulation time of the flux run
    #[builder(default = "1.0e4")]
    pub elapsed_time: f64,

    /// `(successes, attempts)` at each shooting stage
    #[builder(default = "vec![(30, 100), (12, 60), (9, 10)]")]
    pub stage_counts: Vec<(u64, u64)>,
}

impl FfsSystemBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(counts) = &self.stage_counts {
            for (i, &(successes, attempts)) in counts.iter().enumerate() {
                if successes > attempts {
                    return Err(format!(
                        "stage {} has more successes ({}) than attempts ({})",
                        i + 1,
                        successes,
                        attempts
                    ));
                }
            }
        }

        Ok(())
    }

    /// Build the test system
    pub fn build(&self) -> Result<FfsSystem> {
        Ok(self.build_inner()?)
    }
}

impl FfsSystem {
    /// Get a new builder for the `FfsSystem` struct
    pub fn builder() -> FfsSystemBuilder {
        FfsSystemBuilder::default()
    }

    /// $k = \Phi \prod_i p_i$ with $\Phi$ the crossing count over elapsed time
    pub fn analytical_rate(&self) -> f64 {
        self.stage_counts
            .iter()
            .map(|&(s, n)| s as f64 / n as f64)
            .fold(self.crossings as f64 / self.elapsed_time, |acc, p| acc * p)
    }

    /// Write replica `i` of a case: `FLUX/FLUX_i/` and `SHOOTk/SHOOT_i/` for every stage
    pub fn write_replica(&self, case_dir: &Path, i: usize) -> Result<FfsFiles> {
        let flux_dir = case_dir.join("FLUX").join(format!("FLUX_{}", i));
        let flux = flux_dir.join(FLUX_FILE);
        create_dir(&flux_dir)?;
        write(
            &flux,
            &format!(
                "Number of crossings: {}\nElapsed time: {}\n",
                self.crossings, self.elapsed_time
            ),
        )?;

        let mut stages = Vec::with_capacity(self.stage_counts.len());
        for (k, &(successes, attempts)) in self.stage_counts.iter().enumerate() {
            let stage_dir = case_dir
                .join(format!("SHOOT{}", k + 1))
                .join(format!("SHOOT_{}", i));
            create_dir(&stage_dir)?;

            let mut log = String::from("INFO: launching shooting trajectories\n");
            for n in 0..attempts {
                if n < successes {
                    log.push_str(&format!("SUCCESS: trajectory {} reached the interface\n", n));
                } else {
                    log.push_str(&format!("FAILURE: trajectory {} returned to the basin\n", n));
                }
            }

            let path = stage_dir.join(OUTCOME_FILE);
            write(&path, &log)?;
            stages.push(Some(path));
        }

        Ok(FfsFiles {
            flux: Some(flux),
            stages,
        })
    }
}

impl Default for FfsSystem {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("FfsSystem should not fail with default params")
    }
}

fn row(bin: &BinKey) -> String {
    bin.0
        .iter()
        .map(|op| op.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| AnalysisError::io(path, e))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| AnalysisError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{
        load_bias_weights, load_flux_summary, load_outcome_log, load_trace, TraceFormat,
    };
    use approx::assert_relative_eq;

    #[test]
    fn mismatched_lengths_are_rejected() {
        let result = TwoStateSystem::builder()
            .bound_weights(array![1.0, 2.0])
            .bound_samples(array![1])
            .build();
        assert!(matches!(result, Err(AnalysisError::BuilderError(_))));

        let result = TwoStateSystem::builder().unbound_weight(0.0).build();
        assert!(result.is_err());

        let result = FfsSystem::builder().stage_counts(vec![(2, 1)]).build();
        assert!(result.is_err());
    }

    #[test]
    fn analytical_delta_f() {
        let system = TwoStateSystem::builder()
            .unbound_weight(2.0)
            .bound_weights(array![4.0])
            .unbound_samples(10)
            .bound_samples(array![10])
            .build()
            .unwrap();
        assert_relative_eq!(system.analytical_delta_f(), 2f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn written_replica_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let system = TwoStateSystem::default();
        let files = system.write_replica(dir.path()).unwrap();

        let format = TraceFormat::default();
        let weights = load_bias_weights(&files.weights, &format).unwrap();
        assert_eq!(weights.len(), 4);
        assert_relative_eq!(
            weights.log_weight(&TwoStateSystem::bin(2)).unwrap(),
            100f64.ln(),
            epsilon = 1e-12
        );

        let samples = load_trace(&files.traces[0], &format).unwrap();
        assert_eq!(samples.len(), 260);
        assert_eq!(samples[0].bin, TwoStateSystem::bin(0));
        assert_eq!(samples[259].bin, TwoStateSystem::bin(3));
        assert_eq!(samples, system.sample().samples);
    }

    #[test]
    fn written_ffs_replica_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let system = FfsSystem::default();
        let files = system.write_replica(dir.path(), 4).unwrap();

        let flux = files.flux.unwrap();
        assert!(flux.ends_with("FLUX/FLUX_4/flux_summary.txt"));
        let summary = load_flux_summary(&flux).unwrap();
        assert_eq!(summary.crossings, 50);
        assert_eq!(summary.value, 1.0e4);

        assert_eq!(files.stages.len(), 3);
        let log = load_outcome_log(files.stages[1].as_ref().unwrap()).unwrap();
        assert_eq!(log.successes(), 12);
        assert_eq!(log.attempts(), 60);

        assert_relative_eq!(
            system.analytical_rate(),
            0.005 * 0.3 * 0.2 * 0.9,
            epsilon = 1e-15
        );
    }
}
