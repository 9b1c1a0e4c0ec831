//! Analysis configuration.
//!
//! Everything the analysis needs to know about where the data lives and how the simulations
//! were set up is carried in one `AnalysisConfig`, usually read from a TOML file:
//!
//! ```toml
//! input_root = "runs"
//! reference_box_side = 25.0
//! exclude = ["hyb"]
//!
//! [[groups]]
//! name = "gc"
//! contains = "gc"
//! not_contains = "gc5"
//! box_side = 40.0
//!
//! [kinetics]
//! stages = 3
//! replicas = 5
//! flux_value = "time_per_crossing"
//! ```

use crate::errors::*;
use crate::ffs::{FluxValueKind, RateEstimator};
use crate::io::TraceFormat;
use crate::umbrella::{MacrostateClassification, UnbiasingEstimator};
use crate::volume::{cubic_volume, VolumeStandardizer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Root configuration for an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Directory holding the simulation case directories
    #[serde(default = "default_input_root")]
    pub input_root: PathBuf,

    /// Side of the cubic reference box free energies are standardized to
    #[serde(default = "default_reference_box_side")]
    pub reference_box_side: f64,

    /// Umbrella sampling directories whose names contain any of these are skipped
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Prefix of umbrella sampling replica directory names
    #[serde(default = "default_case_prefix")]
    pub case_prefix: String,

    /// Analysis groups, each a set of simulation designs sharing a box size
    #[serde(default = "default_groups")]
    pub groups: Vec<GroupConfig>,

    /// Forward Flux Sampling layout
    #[serde(default)]
    pub kinetics: KineticsConfig,

    /// Column layout of weight and energy files
    #[serde(default)]
    pub trace: TraceFormat,

    /// Rule splitting frames into unbound and bound
    #[serde(default)]
    pub classification: MacrostateClassification,
}

fn default_input_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_reference_box_side() -> f64 {
    25.0
}

fn default_exclude() -> Vec<String> {
    vec!["hyb".to_string()]
}

fn default_case_prefix() -> String {
    "bub_".to_string()
}

fn default_groups() -> Vec<GroupConfig> {
    vec![
        GroupConfig::new("ev", "ev", None, 30.0),
        GroupConfig::new("p", "p", None, 40.0),
        GroupConfig::new("at", "at", None, 30.0),
        GroupConfig::new("gc", "gc", Some("gc5"), 40.0),
        GroupConfig::new("gc5", "gc5", None, 40.0),
    ]
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            input_root: default_input_root(),
            reference_box_side: default_reference_box_side(),
            exclude: default_exclude(),
            case_prefix: default_case_prefix(),
            groups: default_groups(),
            kinetics: KineticsConfig::default(),
            trace: TraceFormat::default(),
            classification: MacrostateClassification::default(),
        }
    }
}

impl FromStr for AnalysisConfig {
    type Err = AnalysisError;

    /// Parse and validate configuration from a TOML string
    fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

impl AnalysisConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        content.parse()
    }

    /// Check the configuration for values no analysis could use
    pub fn validate(&self) -> Result<()> {
        check_side("reference_box_side", self.reference_box_side)?;

        let mut names = HashSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(AnalysisError::Configuration(
                    "group names must not be empty".to_string(),
                ));
            }
            if group.contains.is_empty() {
                return Err(AnalysisError::Configuration(format!(
                    "group '{}' must have a non-empty 'contains' rule",
                    group.name
                )));
            }
            if !names.insert(group.name.as_str()) {
                return Err(AnalysisError::Configuration(format!(
                    "group '{}' is defined twice",
                    group.name
                )));
            }
            check_side(&format!("box_side of group '{}'", group.name), group.box_side)?;
        }

        if self.kinetics.stages == 0 {
            return Err(AnalysisError::Configuration(
                "kinetics.stages must be at least 1".to_string(),
            ));
        }
        if self.kinetics.replicas == 0 {
            return Err(AnalysisError::Configuration(
                "kinetics.replicas must be at least 1".to_string(),
            ));
        }

        if self.trace.bin_width == 0 {
            return Err(AnalysisError::Configuration(
                "trace.bin_width must be at least 1".to_string(),
            ));
        }
        if self.classification.coordinate_index >= self.trace.bin_width {
            return Err(AnalysisError::Configuration(format!(
                "classification.coordinate_index ({}) is outside a bin of width {}",
                self.classification.coordinate_index, self.trace.bin_width
            )));
        }
        if self.classification.bound_threshold <= self.classification.unbound_value {
            return Err(AnalysisError::Configuration(format!(
                "classification.bound_threshold ({}) must exceed unbound_value ({})",
                self.classification.bound_threshold, self.classification.unbound_value
            )));
        }

        Ok(())
    }

    /// $V_\mathrm{ref}$
    pub fn reference_volume(&self) -> f64 {
        cubic_volume(self.reference_box_side)
    }

    /// The first group whose rules match a case name, ignoring global exclusions
    pub fn group_for(&self, case_name: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.matches(case_name))
    }

    /// Does a directory name contain any of the globally excluded substrings?
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|e| name.contains(e.as_str()))
    }

    /// Standardizer for the configured reference volume
    pub fn volume_standardizer(&self) -> Result<VolumeStandardizer> {
        VolumeStandardizer::new(self.reference_volume())
    }

    /// Unbiasing estimator for the configured macrostate rule
    pub fn unbiasing_estimator(&self) -> UnbiasingEstimator {
        UnbiasingEstimator::new(self.classification.clone())
    }

    /// Rate estimator for the configured number of stages
    pub fn rate_estimator(&self) -> Result<RateEstimator> {
        Ok(RateEstimator::builder()
            .stages(self.kinetics.stages)
            .build()?)
    }
}

fn check_side(what: &str, side: f64) -> Result<()> {
    if !(side.is_finite() && side > 0.0) {
        return Err(AnalysisError::Configuration(format!(
            "{} must be positive, not {}",
            what, side
        )));
    }
    Ok(())
}

/// A named set of simulation designs sharing a box size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Name the group is reported under
    pub name: String,
    /// Case names must contain this substring
    pub contains: String,
    /// Case names must not contain this substring
    #[serde(default)]
    pub not_contains: Option<String>,
    /// Side of the cubic simulation box
    pub box_side: f64,
}

impl GroupConfig {
    /// Create a group
    pub fn new(name: &str, contains: &str, not_contains: Option<&str>, box_side: f64) -> Self {
        Self {
            name: name.to_string(),
            contains: contains.to_string(),
            not_contains: not_contains.map(str::to_string),
            box_side,
        }
    }

    /// Does a case name satisfy this group's `contains` / `not_contains` rules?
    pub fn matches(&self, case_name: &str) -> bool {
        case_name.contains(self.contains.as_str())
            && !self
                .not_contains
                .as_deref()
                .map_or(false, |nc| case_name.contains(nc))
    }

    /// Volume of this group's simulation box
    pub fn box_volume(&self) -> f64 {
        cubic_volume(self.box_side)
    }
}

/// Forward Flux Sampling layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KineticsConfig {
    /// Shooting stages after the flux run
    pub stages: usize,
    /// Replicas per case
    pub replicas: usize,
    /// Meaning of the value in flux summary files
    pub flux_value: FluxValueKind,
    /// Directory names under the input root that are not cases
    pub ignore: Vec<String>,
}

impl Default for KineticsConfig {
    fn default() -> Self {
        Self {
            stages: 3,
            replicas: 5,
            flux_value: FluxValueKind::default(),
            ignore: vec!["FFS_values".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AnalysisConfig::default();
        config.validate().unwrap();
        assert_eq!(config.groups.len(), 5);
        assert_eq!(config.reference_volume(), 15625.0);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config: AnalysisConfig = "".parse().unwrap();
        assert_eq!(config, AnalysisConfig::default());
    }

    #[test]
    fn parse_toml() {
        let config: AnalysisConfig = r#"
            input_root = "/data/runs"
            reference_box_side = 20.0
            exclude = []

            [[groups]]
            name = "gc"
            contains = "gc"
            not_contains = "gc5"
            box_side = 40.0

            [kinetics]
            stages = 2
            flux_value = "time_per_crossing"

            [classification]
            coordinate_index = 0
        "#
        .parse()
        .unwrap();

        assert_eq!(config.input_root, PathBuf::from("/data/runs"));
        assert_eq!(config.reference_volume(), 8000.0);
        assert!(config.exclude.is_empty());
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.kinetics.stages, 2);
        assert_eq!(config.kinetics.replicas, 5);
        assert_eq!(config.kinetics.flux_value, FluxValueKind::TimePerCrossing);
        assert_eq!(config.classification.coordinate_index, 0);
        assert_eq!(config.classification.bound_threshold, 1);
        assert_eq!(config.rate_estimator().unwrap().stages(), 2);
    }

    #[test]
    fn group_rules() {
        let config = AnalysisConfig::default();
        assert_eq!(config.group_for("bub_gc3").unwrap().name, "gc");
        assert_eq!(config.group_for("bub_gc5b").unwrap().name, "gc5");
        assert!(config.group_for("bub_xyz").is_none());
        assert!(config.is_excluded("bub_at1hyb"));
        assert!(!config.is_excluded("bub_at1"));
        assert_eq!(config.group_for("bub_at1").unwrap().box_volume(), 27000.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad = [
            "reference_box_side = 0.0",
            "[[groups]]\nname = \"a\"\ncontains = \"a\"\nbox_side = -1.0",
            "[[groups]]\nname = \"a\"\ncontains = \"\"\nbox_side = 1.0",
            "[kinetics]\nstages = 0",
            "[classification]\ncoordinate_index = 8",
            "[classification]\nbound_threshold = 0",
        ];
        for text in bad.iter() {
            let result: Result<AnalysisConfig> = text.parse();
            assert!(
                matches!(result, Err(AnalysisError::Configuration(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn duplicate_groups_are_rejected() {
        let text = r#"
            [[groups]]
            name = "a"
            contains = "a"
            box_side = 1.0

            [[groups]]
            name = "a"
            contains = "b"
            box_side = 1.0
        "#;
        assert!(text.parse::<AnalysisConfig>().is_err());
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let result: Result<AnalysisConfig> = "reference_box_side = \"big\"".parse();
        assert!(matches!(result, Err(AnalysisError::ConfigParse { .. })));
    }
}
