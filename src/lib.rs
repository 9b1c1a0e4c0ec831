#![warn(rust_2018_idioms, missing_docs, missing_debug_implementations)]

//! Post-processing of oxDNA simulations into binding free energies and transition rates.
//!
//! Two independent analyses are provided:
//!
//! - Umbrella sampling trajectories are unbiased with the weights they were sampled under,
//!   giving the free energy difference between the unbound and bound states. Because that
//!   difference depends on the simulation box, it is then referred to a common reference volume
//!   so that designs simulated in different boxes can be compared.
//! - Forward Flux Sampling runs give a transition rate as the flux out of the initial basin times
//!   the probability of reaching each successive interface.
//!
//! Each simulation design (a case) is run as several independent replicas. Per-replica results
//! are combined into a mean and a standard error of the mean, and a replica that cannot be
//! analysed is reported and left out rather than aborting the whole case.
//!
//! # Examples
//!
//! ```
//! use oxdna_analysis::*;
//!
//! let flux = FluxMeasurement::new(100, 50.0).unwrap();
//! let stages = [
//!     StageProbability::from_counts(1, 2).unwrap(),
//!     StageProbability::from_counts(2, 5).unwrap(),
//!     StageProbability::from_counts(10, 10).unwrap(),
//! ];
//! let rate = RateEstimator::default().estimate(&flux, &stages).unwrap();
//! assert!((rate.rate - 0.4).abs() < 1e-12);
//! ```

#[macro_use]
extern crate derive_builder;

pub mod aggregate;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod ffs;
pub mod io;
pub mod numeric;
pub mod pipeline;
pub mod testsystems;
pub mod umbrella;
pub mod volume;

pub use aggregate::{AggregateResult, ReplicaEstimate, ReplicaSet};
pub use config::AnalysisConfig;
pub use discovery::{FfsDirectories, ReplicaSource, UmbrellaDirectories};
pub use errors::{AnalysisError, Result};
pub use ffs::{
    ChainState, FfsChain, FluxMeasurement, RateEstimate, RateEstimator, StageProbability,
    TrajectoryOutcome, TrajectoryOutcomeLog,
};
pub use pipeline::{estimate_free_energies, estimate_rates, FreeEnergyReport, RateReport};
pub use umbrella::{
    BiasWeightTable, BinKey, MacrostateClassification, OrderParameterSample, RawFreeEnergy,
    UnbiasingEstimator,
};
pub use volume::{StandardizedFreeEnergy, VolumeStandardizer};
