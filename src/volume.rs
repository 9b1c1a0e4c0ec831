//! Standard-state correction of box-size dependent free energies.

use crate::errors::*;
use crate::umbrella::RawFreeEnergy;
use serde::{Deserialize, Serialize};

/// Volume of a cubic simulation box with the given side length
pub fn cubic_volume(box_side: f64) -> f64 {
    box_side.powi(3)
}

/// A free energy difference referred to a fixed reference volume, in units of $k_B T$
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardizedFreeEnergy {
    /// The box-size dependent estimate that was corrected
    pub raw: RawFreeEnergy,
    /// $\ln(V_\mathrm{ref} / V_\mathrm{sim})$
    pub correction: f64,
    /// $\Delta F_\mathrm{raw} + \ln(V_\mathrm{ref} / V_\mathrm{sim})$
    pub delta_f: f64,
    /// $V_\mathrm{sim}$, the box volume the replica was simulated in
    pub box_volume: f64,
    /// $V_\mathrm{ref}$
    pub reference_volume: f64,
}

/// Applies the ideal-gas translational correction $\ln(V_\mathrm{ref} / V_\mathrm{sim})$.
///
/// Binding two strands in a box of volume $V$ has a free energy that depends on $V$ through
/// the translational entropy of the unbound pair. Adding the correction makes estimates from
/// boxes of different sizes comparable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeStandardizer {
    reference_volume: f64,
}

impl VolumeStandardizer {
    /// Create a standardizer for the given reference volume
    pub fn new(reference_volume: f64) -> Result<Self> {
        check_volume("reference volume", reference_volume)?;
        Ok(Self { reference_volume })
    }

    /// Create a standardizer whose reference volume is a cube of side `box_side`
    pub fn from_box_side(box_side: f64) -> Result<Self> {
        Self::new(cubic_volume(box_side))
    }

    /// $V_\mathrm{ref}$
    pub fn reference_volume(&self) -> f64 {
        self.reference_volume
    }

    /// $\ln(V_\mathrm{ref} / V_\mathrm{sim})$, exactly zero when the volumes match
    pub fn correction(&self, box_volume: f64) -> Result<f64> {
        check_volume("box volume", box_volume)?;
        if box_volume == self.reference_volume {
            return Ok(0.0);
        }
        Ok((self.reference_volume / box_volume).ln())
    }

    /// Refer a raw estimate from a box of volume `box_volume` to the reference volume
    pub fn standardize(
        &self,
        raw: RawFreeEnergy,
        box_volume: f64,
    ) -> Result<StandardizedFreeEnergy> {
        let correction = self.correction(box_volume)?;
        Ok(StandardizedFreeEnergy {
            raw,
            correction,
            delta_f: raw.delta_f + correction,
            box_volume,
            reference_volume: self.reference_volume,
        })
    }
}

fn check_volume(what: &str, volume: f64) -> Result<()> {
    if !(volume.is_finite() && volume > 0.0) {
        return Err(AnalysisError::Configuration(format!(
            "{} must be positive and finite, not {}",
            what, volume
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn raw(delta_f: f64) -> RawFreeEnergy {
        RawFreeEnergy {
            delta_f,
            log_z_unbound: 0.0,
            log_z_bound: -delta_f,
            unbound_samples: 10,
            bound_samples: 10,
        }
    }

    #[test]
    fn matching_volumes_leave_estimate_unchanged() {
        let standardizer = VolumeStandardizer::from_box_side(25.0).unwrap();
        let standardized = standardizer
            .standardize(raw(-4.25), cubic_volume(25.0))
            .unwrap();
        assert_eq!(standardized.correction, 0.0);
        assert_eq!(standardized.delta_f, -4.25);
    }

    #[test]
    fn larger_box_lowers_free_energy() {
        let standardizer = VolumeStandardizer::from_box_side(25.0).unwrap();
        let standardized = standardizer
            .standardize(raw(-4.0), cubic_volume(40.0))
            .unwrap();
        let expected = 3.0 * (25.0f64 / 40.0).ln();
        assert_relative_eq!(standardized.correction, expected, epsilon = 1e-12);
        assert_relative_eq!(standardized.delta_f, -4.0 + expected, epsilon = 1e-12);
        assert_relative_eq!(standardized.box_volume, 64000.0);
        assert_relative_eq!(standardized.reference_volume, 15625.0);
    }

    #[test]
    fn non_positive_volumes_are_configuration_errors() {
        assert!(matches!(
            VolumeStandardizer::new(0.0),
            Err(AnalysisError::Configuration(_))
        ));
        assert!(matches!(
            VolumeStandardizer::from_box_side(-2.0),
            Err(AnalysisError::Configuration(_))
        ));

        let standardizer = VolumeStandardizer::new(1.0).unwrap();
        assert!(matches!(
            standardizer.standardize(raw(1.0), 0.0),
            Err(AnalysisError::Configuration(_))
        ));
        assert!(matches!(
            standardizer.correction(f64::NAN),
            Err(AnalysisError::Configuration(_))
        ));
    }
}
