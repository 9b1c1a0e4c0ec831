//! Forward Flux Sampling rate estimation.
//!
//! A transition rate is decomposed into the flux of trajectories leaving the initial basin
//! through the first interface, times the conditional probability of reaching each subsequent
//! interface from the previous one:
//!
//! $$ k = \Phi_{A,0} \prod_{i=1}^{N} P(\lambda_i \mid \lambda_{i-1}) $$
//!
//! Each factor is measured independently, so first-order error propagation for the product
//! sums the squared relative errors.

use crate::errors::*;
use crate::numeric::relative_variance;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one shooting trajectory launched from an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryOutcome {
    /// Reached the next interface
    Success,
    /// Fell back to the initial basin
    Failure,
}

/// Independent trial outcomes for one shooting stage of one replica
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrajectoryOutcomeLog {
    outcomes: Vec<TrajectoryOutcome>,
}

impl TrajectoryOutcomeLog {
    /// An empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record another trajectory
    pub fn push(&mut self, outcome: TrajectoryOutcome) {
        self.outcomes.push(outcome);
    }

    /// Number of trajectories that reached the next interface
    pub fn successes(&self) -> u64 {
        self.outcomes
            .iter()
            .filter(|&&o| o == TrajectoryOutcome::Success)
            .count() as u64
    }

    /// Number of trajectories launched
    pub fn attempts(&self) -> u64 {
        self.outcomes.len() as u64
    }

    /// The outcomes in launch order
    pub fn outcomes(&self) -> &[TrajectoryOutcome] {
        &self.outcomes
    }
}

impl std::iter::FromIterator<TrajectoryOutcome> for TrajectoryOutcomeLog {
    fn from_iter<I: IntoIterator<Item = TrajectoryOutcome>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}

/// Conditional crossing probability of one FFS stage, with binomial counting statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageProbability {
    /// Trajectories that reached the next interface
    pub successes: u64,
    /// Trajectories launched
    pub attempts: u64,
    /// `successes / attempts`
    pub probability: f64,
    /// Binomial standard error $\sqrt{p(1-p)/n}$
    pub error: f64,
}

impl StageProbability {
    /// Estimate the crossing probability from an outcome log
    pub fn estimate(log: &TrajectoryOutcomeLog) -> Result<Self> {
        Self::from_counts(log.successes(), log.attempts())
    }

    /// Estimate the crossing probability from counts.
    ///
    /// $p = 0$ and $p = 1$ are valid and have zero error. No smoothing is applied.
    ///
    /// # Errors
    ///
    /// `InsufficientData` if no trajectories were launched, and `MalformedInput` if there are
    /// more successes than attempts.
    pub fn from_counts(successes: u64, attempts: u64) -> Result<Self> {
        if attempts == 0 {
            return Err(AnalysisError::InsufficientData(
                "stage launched no trajectories".to_string(),
            ));
        }
        if successes > attempts {
            return Err(AnalysisError::malformed(
                "outcome counts",
                0,
                format!("{} successes out of {} attempts", successes, attempts),
            ));
        }

        let n = attempts as f64;
        let probability = successes as f64 / n;
        let error = (probability * (1.0 - probability) / n).sqrt();

        Ok(Self {
            successes,
            attempts,
            probability,
            error,
        })
    }

    /// $(\sigma_p / p)^2$; zero at the boundaries $p \in \{0, 1\}$
    pub fn relative_variance(&self) -> f64 {
        relative_variance(self.probability, self.error)
    }
}

/// How the second value of a flux summary should be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FluxValueKind {
    /// Total simulation time of the basin run; rate is crossings / time
    ElapsedTime,
    /// Mean simulation time between first crossings; rate is its inverse
    TimePerCrossing,
}

impl Default for FluxValueKind {
    fn default() -> Self {
        Self::ElapsedTime
    }
}

/// First-crossing flux out of the initial basin through the first interface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluxMeasurement {
    /// First-crossing events observed
    pub crossings: u64,
    /// Simulation time of the basin run
    pub elapsed_time: f64,
    /// Crossings per unit simulation time
    pub rate: f64,
}

impl FluxMeasurement {
    /// Flux from a crossing count and the elapsed simulation time.
    ///
    /// # Errors
    ///
    /// `InsufficientData` if no crossings were observed, `MalformedInput` if the time is not
    /// positive and finite.
    pub fn new(crossings: u64, elapsed_time: f64) -> Result<Self> {
        if crossings == 0 {
            return Err(AnalysisError::InsufficientData(
                "flux run observed no crossings".to_string(),
            ));
        }
        if !(elapsed_time.is_finite() && elapsed_time > 0.0) {
            return Err(AnalysisError::malformed(
                "flux summary",
                0,
                format!("simulation time {} is not positive", elapsed_time),
            ));
        }

        Ok(Self {
            crossings,
            elapsed_time,
            rate: crossings as f64 / elapsed_time,
        })
    }

    /// Flux from a summary's crossing count and value, read according to `kind`
    pub fn from_summary(crossings: u64, value: f64, kind: FluxValueKind) -> Result<Self> {
        match kind {
            FluxValueKind::ElapsedTime => Self::new(crossings, value),
            FluxValueKind::TimePerCrossing => Self::new(crossings, value * crossings as f64),
        }
    }

    /// Mean simulation time between crossings, $1 / \Phi$
    pub fn time_per_crossing(&self) -> f64 {
        self.elapsed_time / self.crossings as f64
    }

    /// Poisson counting estimate of $(\sigma_\Phi / \Phi)^2 = 1 / n$
    pub fn relative_variance(&self) -> f64 {
        1.0 / self.crossings as f64
    }
}

/// An independently measured factor of a product, with its squared relative error
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    /// Measured value
    pub value: f64,
    /// $(\sigma / x)^2$
    pub relative_variance: f64,
}

impl From<&FluxMeasurement> for Factor {
    fn from(flux: &FluxMeasurement) -> Self {
        Self {
            value: flux.rate,
            relative_variance: flux.relative_variance(),
        }
    }
}

impl From<&StageProbability> for Factor {
    fn from(stage: &StageProbability) -> Self {
        Self {
            value: stage.probability,
            relative_variance: stage.relative_variance(),
        }
    }
}

/// Multiply independent factors, summing their relative variances.
///
/// The empty product is $1$ with no uncertainty.
pub fn propagate_product<I>(factors: I) -> Factor
where
    I: IntoIterator<Item = Factor>,
{
    factors.into_iter().fold(
        Factor {
            value: 1.0,
            relative_variance: 0.0,
        },
        |acc, f| Factor {
            value: acc.value * f.value,
            relative_variance: acc.relative_variance + f.relative_variance,
        },
    )
}

/// A transition rate from one replica's complete FFS chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEstimate {
    /// Flux times the product of stage probabilities
    pub rate: f64,
    /// Relative variance of `rate` under first-order propagation
    pub relative_variance: f64,
    /// The flux the rate was built from
    pub flux: FluxMeasurement,
    /// Stage probabilities in interface order
    pub stages: Vec<StageProbability>,
}

impl RateEstimate {
    /// Absolute standard error of the rate
    pub fn error(&self) -> f64 {
        self.rate * self.relative_variance.sqrt()
    }
}

/// Combines a flux and a full chain of stage probabilities into a rate
#[derive(Builder, Debug, Clone, Copy, PartialEq)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct RateEstimator {
    /// Number of shooting stages between the first interface and the product state
    #[builder(default = "3")]
    stages: usize,
}

impl RateEstimatorBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.stages == Some(0) {
            return Err("an FFS chain needs at least one shooting stage".to_string());
        }
        Ok(())
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self { stages: 3 }
    }
}

impl RateEstimator {
    /// Get a new builder for the `RateEstimator` struct
    pub fn builder() -> RateEstimatorBuilder {
        RateEstimatorBuilder::default()
    }

    /// Number of shooting stages a complete chain has
    pub fn stages(&self) -> usize {
        self.stages
    }

    /// Compute the rate from a flux and the stage probabilities in interface order.
    ///
    /// # Errors
    ///
    /// `IncompleteChain` if the number of stages is not exactly `self.stages()`. Skipping a
    /// stage would drop an attrition factor and overstate the rate.
    pub fn estimate(
        &self,
        flux: &FluxMeasurement,
        stages: &[StageProbability],
    ) -> Result<RateEstimate> {
        if stages.len() != self.stages {
            return Err(AnalysisError::IncompleteChain(format!(
                "expected {} stage probabilities, got {}",
                self.stages,
                stages.len()
            )));
        }

        let product = propagate_product(
            std::iter::once(Factor::from(flux)).chain(stages.iter().map(Factor::from)),
        );

        Ok(RateEstimate {
            rate: product.value,
            relative_variance: product.relative_variance,
            flux: *flux,
            stages: stages.to_vec(),
        })
    }

    /// Start tracking one replica's chain
    pub fn chain(&self) -> FfsChain {
        FfsChain {
            estimator: *self,
            state: ChainState::FluxPending,
            flux: None,
            stages: Vec::with_capacity(self.stages),
        }
    }
}

/// Progress of one replica through its FFS chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// Waiting for the basin flux
    FluxPending,
    /// Flux recorded, waiting for stage 1
    FluxDone,
    /// Stages 1 through `n` recorded
    StageDone(usize),
    /// All factors present and multiplied
    RateComputed,
    /// A factor failed or arrived out of order; the replica contributes nothing
    Incomplete(String),
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FluxPending => write!(f, "FLUX_PENDING"),
            Self::FluxDone => write!(f, "FLUX_DONE"),
            Self::StageDone(n) => write!(f, "SHOOT{}_DONE", n),
            Self::RateComputed => write!(f, "RATE_COMPUTED"),
            Self::Incomplete(reason) => write!(f, "INCOMPLETE ({})", reason),
        }
    }
}

/// State machine enforcing that a rate is only built from a complete, ordered chain.
///
/// `FLUX_PENDING → FLUX_DONE → SHOOT1_DONE → … → SHOOTn_DONE → RATE_COMPUTED`, with any failure
/// moving to the terminal `INCOMPLETE` state.
#[derive(Debug, Clone)]
pub struct FfsChain {
    estimator: RateEstimator,
    state: ChainState,
    flux: Option<FluxMeasurement>,
    stages: Vec<StageProbability>,
}

impl FfsChain {
    /// Current state
    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// Record the basin flux, or the failure to measure it.
    ///
    /// A failure leaves the chain `Incomplete` and is returned as is.
    pub fn record_flux(&mut self, flux: Result<FluxMeasurement>) -> Result<()> {
        self.check_not_incomplete()?;
        if self.state != ChainState::FluxPending {
            return Err(self.abandon(AnalysisError::IncompleteChain(format!(
                "flux recorded in state {}",
                self.state
            ))));
        }

        match flux {
            Ok(flux) => {
                self.flux = Some(flux);
                self.state = ChainState::FluxDone;
                Ok(())
            }
            Err(e) => Err(self.fail("flux", e)),
        }
    }

    /// Record the probability of stage `stage` (1-based), or the failure to measure it
    pub fn record_stage(
        &mut self,
        stage: usize,
        probability: Result<StageProbability>,
    ) -> Result<()> {
        self.check_not_incomplete()?;
        let expected = match self.state {
            ChainState::FluxDone => 1,
            ChainState::StageDone(n) if n < self.estimator.stages => n + 1,
            _ => 0,
        };
        if stage != expected {
            return Err(self.abandon(AnalysisError::IncompleteChain(format!(
                "stage {} recorded in state {}",
                stage, self.state
            ))));
        }

        match probability {
            Ok(p) => {
                self.stages.push(p);
                self.state = ChainState::StageDone(stage);
                Ok(())
            }
            Err(e) => Err(self.fail(&format!("stage {}", stage), e)),
        }
    }

    /// Multiply out the chain.
    ///
    /// # Errors
    ///
    /// `IncompleteChain` unless the flux and every stage were recorded.
    pub fn finish(&mut self) -> Result<RateEstimate> {
        self.check_not_incomplete()?;
        let all_stages =
            matches!(self.state, ChainState::StageDone(n) if n == self.estimator.stages);
        match (all_stages, self.flux) {
            (true, Some(flux)) => {
                let estimate = self.estimator.estimate(&flux, &self.stages)?;
                self.state = ChainState::RateComputed;
                Ok(estimate)
            }
            _ => Err(self.abandon(AnalysisError::IncompleteChain(format!(
                "chain finished in state {}",
                self.state
            )))),
        }
    }

    fn check_not_incomplete(&self) -> Result<()> {
        match &self.state {
            ChainState::Incomplete(reason) => {
                Err(AnalysisError::IncompleteChain(reason.clone()))
            }
            ChainState::RateComputed => Err(AnalysisError::IncompleteChain(
                "rate was already computed".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn abandon(&mut self, error: AnalysisError) -> AnalysisError {
        self.state = ChainState::Incomplete(error.to_string());
        error
    }

    /// Abandon the chain because a factor could not be measured, keeping the error's category
    fn fail(&mut self, factor: &str, error: AnalysisError) -> AnalysisError {
        self.state = ChainState::Incomplete(format!("{}: {}", factor, error));
        error
    }
}
