//! Per-case orchestration of the free energy and rate analyses.
//!
//! Replicas are independent, so each case's replicas are estimated in parallel and the results
//! collected before being reduced. A replica that fails is recorded with its error and left out
//! of the aggregate; it never stops the rest of the batch.

use crate::aggregate::{AggregateResult, ReplicaEstimate, ReplicaSet};
use crate::config::AnalysisConfig;
use crate::discovery::{CaseInfo, FfsFiles, ReplicaFiles, ReplicaSource, UmbrellaFiles};
use crate::errors::*;
use crate::ffs::{FluxMeasurement, FluxValueKind, RateEstimate, RateEstimator, StageProbability};
use crate::io::{self, TraceFormat};
use crate::umbrella::UnbiasingEstimator;
use crate::volume::{StandardizedFreeEnergy, VolumeStandardizer};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A replica that was left out of its case's aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaFailure {
    /// Identifier of the replica
    pub replica_id: String,
    /// Error category, see `AnalysisError::kind`
    pub kind: String,
    /// Human readable description
    pub message: String,
}

impl ReplicaFailure {
    fn new(replica_id: &str, error: &AnalysisError) -> Self {
        Self {
            replica_id: replica_id.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// One replica's standardized free energy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaFreeEnergy {
    /// Identifier of the replica
    pub replica_id: String,
    /// The estimate
    pub estimate: StandardizedFreeEnergy,
}

/// Standardized binding free energy of one case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeEnergyReport {
    /// Case name
    pub case_id: String,
    /// Volume the case was simulated in
    pub box_volume: Option<f64>,
    /// Volume the free energy is referred to
    pub reference_volume: f64,
    /// Replicas found for the case, valid or not
    pub discovered_replicas: usize,
    /// Mean and SEM of $\Delta F / k_B T$ over valid replicas; `None` if there were none
    pub aggregate: Option<AggregateResult>,
    /// Valid replicas
    pub replicas: Vec<ReplicaFreeEnergy>,
    /// Replicas excluded from the aggregate
    pub failed_replicas: Vec<ReplicaFailure>,
}

/// One replica's FFS rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaRate {
    /// Identifier of the replica
    pub replica_id: String,
    /// The estimate
    pub estimate: RateEstimate,
}

/// Transition rate of one case, with the factors it was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateReport {
    /// Case name
    pub case_id: String,
    /// Volume the case was simulated in, if a group matched it
    pub box_volume: Option<f64>,
    /// Replicas looked for, complete or not
    pub discovered_replicas: usize,
    /// Mean and SEM of the rate over complete replicas
    pub rate: Option<AggregateResult>,
    /// Mean and SEM of the basin flux over complete replicas
    pub flux: Option<AggregateResult>,
    /// Mean and SEM of the simulation time between first crossings, $1 / \Phi$, over complete
    /// replicas
    pub inverse_flux: Option<AggregateResult>,
    /// Mean and SEM of each stage's crossing probability over complete replicas
    pub stage_probabilities: Vec<Option<AggregateResult>>,
    /// Complete replicas
    pub replicas: Vec<ReplicaRate>,
    /// Replicas whose chain was incomplete
    pub failed_replicas: Vec<ReplicaFailure>,
}

/// Aggregate, turning an empty set into `None` after saying so
fn aggregate_or_missing(case_id: &str, what: &str, set: &ReplicaSet) -> Option<AggregateResult> {
    match set.aggregate() {
        Ok(result) => Some(result),
        Err(e) => {
            warn!("{}: {} is missing: {}", case_id, what, e);
            None
        }
    }
}

/// Split per-replica results into successes and recorded failures
fn partition<T>(
    case_id: &str,
    results: Vec<(String, Result<T>)>,
) -> (Vec<(String, T)>, Vec<ReplicaFailure>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for (replica_id, result) in results {
        match result {
            Ok(value) => ok.push((replica_id, value)),
            Err(e) => {
                warn!("{}: skipping replica {}: {}", case_id, replica_id, e);
                failed.push(ReplicaFailure::new(&replica_id, &e));
            }
        }
    }
    (ok, failed)
}

/// Replicas of a case, or a single failure entry if they could not be listed
fn list_replicas<S: ReplicaSource>(
    source: &S,
    case: &CaseInfo,
) -> std::result::Result<Vec<ReplicaFiles<S::Files>>, ReplicaFailure> {
    source.replicas(case).map_err(|e| {
        warn!("{}: could not list replicas: {}", case.id, e);
        ReplicaFailure::new("*", &e)
    })
}

/// Raw free energy of one replica, standardized to the reference volume
pub fn free_energy_for_replica(
    files: &UmbrellaFiles,
    box_volume: Option<f64>,
    format: &TraceFormat,
    estimator: &UnbiasingEstimator,
    standardizer: &VolumeStandardizer,
) -> Result<StandardizedFreeEnergy> {
    let box_volume = box_volume.ok_or_else(|| {
        AnalysisError::Configuration("no box size is configured for this case".to_string())
    })?;

    let weights = io::load_bias_weights(&files.weights, format)?;
    if files.traces.is_empty() {
        return Err(AnalysisError::InsufficientData(
            "replica has no energy traces".to_string(),
        ));
    }

    let mut samples = Vec::new();
    for trace in &files.traces {
        samples.extend(io::load_trace(trace, format)?);
    }

    let raw = estimator.estimate(&samples, &weights)?;
    standardizer.standardize(raw, box_volume)
}

/// Standardized free energy of every case the source knows about
pub fn estimate_free_energies<S>(
    source: &S,
    config: &AnalysisConfig,
) -> Result<Vec<FreeEnergyReport>>
where
    S: ReplicaSource<Files = UmbrellaFiles> + Sync,
{
    config.validate()?;
    let standardizer = config.volume_standardizer()?;
    let estimator = config.unbiasing_estimator();
    let format = config.trace;

    let cases = source.cases()?;
    Ok(cases
        .par_iter()
        .map(|case| {
            info!("{}: box volume {:?}", case.id, case.box_volume);
            let (replicas, mut failed_replicas) = match list_replicas(source, case) {
                Ok(replicas) => (replicas, Vec::new()),
                Err(failure) => (Vec::new(), vec![failure]),
            };
            let discovered_replicas = replicas.len();

            let results: Vec<_> = replicas
                .par_iter()
                .map(|replica| {
                    let result = free_energy_for_replica(
                        &replica.files,
                        case.box_volume,
                        &format,
                        &estimator,
                        &standardizer,
                    );
                    (replica.replica_id.clone(), result)
                })
                .collect();

            let (valid, failed) = partition(&case.id, results);
            failed_replicas.extend(failed);

            let replicas: Vec<ReplicaFreeEnergy> = valid
                .into_iter()
                .map(|(replica_id, estimate)| {
                    debug!(
                        "{}: {} raw dF/kT = {:.4}, standardized dF/kT = {:.4}",
                        case.id, replica_id, estimate.raw.delta_f, estimate.delta_f
                    );
                    ReplicaFreeEnergy {
                        replica_id,
                        estimate,
                    }
                })
                .collect();

            let set: ReplicaSet = replicas
                .iter()
                .map(|r| ReplicaEstimate::new(r.replica_id.clone(), r.estimate.delta_f))
                .collect();
            let aggregate = aggregate_or_missing(&case.id, "standardized free energy", &set);
            if let Some(result) = &aggregate {
                info!(
                    "{}: dF/kT = {:.4} ± {} from {} of {} replicas",
                    case.id,
                    result.mean,
                    result
                        .sem
                        .map_or_else(|| "n/a".to_string(), |s| format!("{:.4}", s)),
                    result.replica_count,
                    discovered_replicas
                );
            }

            FreeEnergyReport {
                case_id: case.id.clone(),
                box_volume: case.box_volume,
                reference_volume: standardizer.reference_volume(),
                discovered_replicas,
                aggregate,
                replicas,
                failed_replicas,
            }
        })
        .collect())
}

/// Rate of one replica from its flux summary and shooting logs.
///
/// The factors are pushed through an `FfsChain` in interface order, so a missing or empty
/// stage leaves the chain incomplete instead of being skipped.
pub fn rate_for_replica(
    files: &FfsFiles,
    estimator: &RateEstimator,
    flux_value: FluxValueKind,
) -> Result<RateEstimate> {
    let mut chain = estimator.chain();

    let flux = match &files.flux {
        Some(path) => io::load_flux_summary(path)
            .and_then(|s| FluxMeasurement::from_summary(s.crossings, s.value, flux_value)),
        None => Err(AnalysisError::IncompleteChain(
            "no flux summary".to_string(),
        )),
    };
    chain.record_flux(flux)?;

    for stage in 1..=estimator.stages() {
        let probability = match files.stages.get(stage - 1).and_then(Option::as_ref) {
            Some(path) => {
                io::load_outcome_log(path).and_then(|log| StageProbability::estimate(&log))
            }
            None => Err(AnalysisError::IncompleteChain(format!(
                "no outcome log for SHOOT{}",
                stage
            ))),
        };
        chain.record_stage(stage, probability)?;
    }

    chain.finish()
}

/// FFS rate of every case the source knows about
pub fn estimate_rates<S>(source: &S, config: &AnalysisConfig) -> Result<Vec<RateReport>>
where
    S: ReplicaSource<Files = FfsFiles> + Sync,
{
    config.validate()?;
    let estimator = config.rate_estimator()?;
    let flux_value = config.kinetics.flux_value;

    let cases = source.cases()?;
    Ok(cases
        .par_iter()
        .map(|case| {
            let (replicas, mut failed_replicas) = match list_replicas(source, case) {
                Ok(replicas) => (replicas, Vec::new()),
                Err(failure) => (Vec::new(), vec![failure]),
            };
            let discovered_replicas = replicas.len();

            let results: Vec<_> = replicas
                .par_iter()
                .map(|replica| {
                    let result = rate_for_replica(&replica.files, &estimator, flux_value);
                    (replica.replica_id.clone(), result)
                })
                .collect();

            let (complete, failed) = partition(&case.id, results);
            failed_replicas.extend(failed);

            let replicas: Vec<ReplicaRate> = complete
                .into_iter()
                .map(|(replica_id, estimate)| ReplicaRate {
                    replica_id,
                    estimate,
                })
                .collect();

            let collect_set = |value: &dyn Fn(&RateEstimate) -> f64| -> ReplicaSet {
                replicas
                    .iter()
                    .map(|r| ReplicaEstimate::new(r.replica_id.clone(), value(&r.estimate)))
                    .collect()
            };

            let rate =
                aggregate_or_missing(&case.id, "rate", &collect_set(&|e: &RateEstimate| e.rate));
            let flux = aggregate_or_missing(
                &case.id,
                "flux",
                &collect_set(&|e: &RateEstimate| e.flux.rate),
            );
            let inverse_flux = aggregate_or_missing(
                &case.id,
                "inverse flux",
                &collect_set(&|e: &RateEstimate| e.flux.time_per_crossing()),
            );
            let stage_probabilities = (0..estimator.stages())
                .map(|i| {
                    aggregate_or_missing(
                        &case.id,
                        &format!("SHOOT{} probability", i + 1),
                        &collect_set(&|e: &RateEstimate| e.stages[i].probability),
                    )
                })
                .collect();

            if let Some(result) = &rate {
                info!(
                    "{}: rate = {:.4e} ± {} from {} of {} replicas",
                    case.id,
                    result.mean,
                    result
                        .sem
                        .map_or_else(|| "n/a".to_string(), |s| format!("{:.4e}", s)),
                    result.replica_count,
                    discovered_replicas
                );
            }

            RateReport {
                case_id: case.id.clone(),
                box_volume: case.box_volume,
                discovered_replicas,
                rate,
                flux,
                inverse_flux,
                stage_probabilities,
                replicas,
                failed_replicas,
            }
        })
        .collect())
}
