//! Locating the files of each (case, replica) pair.
//!
//! The estimators never build paths themselves. A `ReplicaSource` hands the pipeline already
//! resolved file locations, so alternative directory layouts only need a new source.

use crate::config::AnalysisConfig;
use crate::errors::*;
use log::debug;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Bias weight file of an umbrella sampling replica
pub const WEIGHTS_FILE: &str = "wfile.dat";
/// Energy trace written by each umbrella sampling run
pub const TRACE_FILE: &str = "energy.dat";
/// Summary of an FFS basin flux run
pub const FLUX_FILE: &str = "flux_summary.txt";
/// Outcome log of an FFS shooting run
pub const OUTCOME_FILE: &str = "ffs.log";

/// A simulation-design case and the box it was simulated in
#[derive(Debug, Clone, PartialEq)]
pub struct CaseInfo {
    /// Name the case is reported under
    pub id: String,
    /// Volume of the simulation box, if known
    pub box_volume: Option<f64>,
}

/// Resolved input files of one replica of one case
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaFiles<F> {
    /// Case the replica belongs to
    pub case_id: String,
    /// Identifier of the replica within its case
    pub replica_id: String,
    /// The replica's files
    pub files: F,
}

/// Files of one umbrella sampling replica
#[derive(Debug, Clone, PartialEq)]
pub struct UmbrellaFiles {
    /// Bias weight table
    pub weights: PathBuf,
    /// Energy traces, concatenated in this order
    pub traces: Vec<PathBuf>,
}

/// Files of one FFS replica. Missing files are `None` rather than absent so that a gap in
/// the chain is visible to the rate estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct FfsFiles {
    /// Flux summary of the basin run
    pub flux: Option<PathBuf>,
    /// Outcome log of each shooting stage, in interface order
    pub stages: Vec<Option<PathBuf>>,
}

/// Something that knows which cases and replicas exist and where their files are.
///
/// Calling the methods again restarts the enumeration.
pub trait ReplicaSource {
    /// What each replica's files look like
    type Files: Send + Sync;

    /// Every case, including cases with no replicas
    fn cases(&self) -> Result<Vec<CaseInfo>>;

    /// Replicas of one case
    fn replicas(&self, case: &CaseInfo) -> Result<Vec<ReplicaFiles<Self::Files>>>;
}

/// A fixed list of cases and replicas, mostly useful for tests and for callers that discover
/// files some other way
#[derive(Debug, Clone, Default)]
pub struct StaticSource<F> {
    cases: Vec<CaseInfo>,
    replicas: Vec<ReplicaFiles<F>>,
}

impl<F: Clone> StaticSource<F> {
    /// Create a source from cases and their replicas
    pub fn new(cases: Vec<CaseInfo>, replicas: Vec<ReplicaFiles<F>>) -> Self {
        Self { cases, replicas }
    }
}

impl<F: Clone + Send + Sync> ReplicaSource for StaticSource<F> {
    type Files = F;

    fn cases(&self) -> Result<Vec<CaseInfo>> {
        Ok(self.cases.clone())
    }

    fn replicas(&self, case: &CaseInfo) -> Result<Vec<ReplicaFiles<F>>> {
        Ok(self
            .replicas
            .iter()
            .filter(|r| r.case_id == case.id)
            .cloned()
            .collect())
    }
}

fn walk_error(root: &Path, error: walkdir::Error) -> AnalysisError {
    let path = error.path().unwrap_or(root).to_path_buf();
    AnalysisError::io(path, error.into())
}

fn subdirectories(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            dirs.push((name.to_string(), entry.into_path()));
        }
    }
    Ok(dirs)
}

/// Every energy trace below a replica directory, in path order. Symlinked run directories are
/// followed. A directory that cannot be walked fails the listing.
fn trace_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut traces = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(dir, e))?;
        if entry.file_type().is_file() && entry.file_name() == TRACE_FILE {
            traces.push(entry.into_path());
        }
    }
    traces.sort();
    Ok(traces)
}

/// Umbrella sampling layout: each analysis group is a case, and each directory under the input
/// root that starts with the case prefix and matches the group's rules is one replica.
#[derive(Debug, Clone)]
pub struct UmbrellaDirectories<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> UmbrellaDirectories<'a> {
    /// Discover replicas under `config.input_root`
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }
}

impl ReplicaSource for UmbrellaDirectories<'_> {
    type Files = UmbrellaFiles;

    fn cases(&self) -> Result<Vec<CaseInfo>> {
        Ok(self
            .config
            .groups
            .iter()
            .map(|g| CaseInfo {
                id: g.name.clone(),
                box_volume: Some(g.box_volume()),
            })
            .collect())
    }

    fn replicas(&self, case: &CaseInfo) -> Result<Vec<ReplicaFiles<UmbrellaFiles>>> {
        let group = match self.config.groups.iter().find(|g| g.name == case.id) {
            Some(group) => group,
            None => return Ok(Vec::new()),
        };

        let mut replicas = Vec::new();
        for (name, path) in subdirectories(&self.config.input_root)? {
            if !name.starts_with(self.config.case_prefix.as_str())
                || self.config.is_excluded(&name)
                || !group.matches(&name)
            {
                continue;
            }

            let traces = trace_files(&path)?;
            debug!("{}: replica {} has {} traces", case.id, name, traces.len());
            replicas.push(ReplicaFiles {
                case_id: case.id.clone(),
                replica_id: name,
                files: UmbrellaFiles {
                    weights: path.join(WEIGHTS_FILE),
                    traces,
                },
            });
        }
        Ok(replicas)
    }
}

/// FFS layout: every directory under the input root is a case, and replica `i` has its flux in
/// `FLUX/FLUX_i/` and its shooting logs in `SHOOTk/SHOOT_i/` for each stage `k`.
#[derive(Debug, Clone)]
pub struct FfsDirectories<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> FfsDirectories<'a> {
    /// Discover cases under `config.input_root`
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    if path.is_file() {
        Some(path)
    } else {
        None
    }
}

impl ReplicaSource for FfsDirectories<'_> {
    type Files = FfsFiles;

    fn cases(&self) -> Result<Vec<CaseInfo>> {
        let kinetics = &self.config.kinetics;
        Ok(subdirectories(&self.config.input_root)?
            .into_iter()
            .filter(|(name, _)| !name.starts_with('.') && !kinetics.ignore.contains(name))
            .map(|(name, _)| CaseInfo {
                box_volume: self.config.group_for(&name).map(|g| g.box_volume()),
                id: name,
            })
            .collect())
    }

    fn replicas(&self, case: &CaseInfo) -> Result<Vec<ReplicaFiles<FfsFiles>>> {
        let case_dir = self.config.input_root.join(&case.id);
        let kinetics = &self.config.kinetics;

        Ok((1..=kinetics.replicas)
            .map(|i| {
                let flux = existing(
                    case_dir
                        .join("FLUX")
                        .join(format!("FLUX_{}", i))
                        .join(FLUX_FILE),
                );
                let stages = (1..=kinetics.stages)
                    .map(|k| {
                        existing(
                            case_dir
                                .join(format!("SHOOT{}", k))
                                .join(format!("SHOOT_{}", i))
                                .join(OUTCOME_FILE),
                        )
                    })
                    .collect();

                ReplicaFiles {
                    case_id: case.id.clone(),
                    replica_id: i.to_string(),
                    files: FfsFiles { flux, stages },
                }
            })
            .collect())
    }
}
