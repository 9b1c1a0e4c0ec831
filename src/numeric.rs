//! Numerically stable helpers shared by the free energy and rate estimators.

/// Streaming $\ln \sum_i e^{x_i}$ without overflow or underflow.
///
/// Keeps a running maximum and a sum of $e^{x_i - \max}$ that is rescaled whenever a new
/// maximum arrives. Useful when the terms are produced one at a time, for instance while
/// walking the bins of a histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogSumExp {
    max: f64,
    scaled_sum: f64,
    terms: usize,
}

impl Default for LogSumExp {
    fn default() -> Self {
        Self {
            max: f64::NEG_INFINITY,
            scaled_sum: 0.0,
            terms: 0,
        }
    }
}

impl LogSumExp {
    /// An empty accumulator, whose value is $-\infty$
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the term $e^x$ to the sum
    pub fn add(&mut self, x: f64) {
        self.terms += 1;
        if x == f64::NEG_INFINITY {
            return;
        }
        if x > self.max {
            self.scaled_sum = self.scaled_sum * (self.max - x).exp() + 1.0;
            self.max = x;
        } else {
            self.scaled_sum += (x - self.max).exp();
        }
    }

    /// Number of terms added so far, including terms of zero mass
    pub fn terms(&self) -> usize {
        self.terms
    }

    /// $\ln \sum_i e^{x_i}$ over the terms added so far
    pub fn value(&self) -> f64 {
        if self.scaled_sum == 0.0 {
            return f64::NEG_INFINITY;
        }
        self.max + self.scaled_sum.ln()
    }
}

impl std::iter::FromIterator<f64> for LogSumExp {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut acc = Self::new();
        for x in iter {
            acc.add(x);
        }
        acc
    }
}

/// Squared relative error $(\sigma / x)^2$ of a measured quantity.
///
/// A zero error gives zero relative variance even when the value itself is zero; this is the
/// degenerate boundary of the binomial estimator at $p = 0$.
pub fn relative_variance(value: f64, error: f64) -> f64 {
    if error == 0.0 {
        0.0
    } else {
        (error / value).powi(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn empty_is_negative_infinity() {
        assert_eq!(LogSumExp::new().value(), f64::NEG_INFINITY);
        let empty: LogSumExp = std::iter::empty::<f64>().collect();
        assert_eq!(empty.value(), f64::NEG_INFINITY);
        assert_eq!(empty.terms(), 0);
    }

    #[test]
    fn matches_naive_for_small_values() {
        let x = array![0.1, -1.3, 2.2, 0.0];
        let naive = x.iter().map(|v: &f64| v.exp()).sum::<f64>().ln();
        let streamed: LogSumExp = x.iter().copied().collect();
        assert_relative_eq!(streamed.value(), naive, epsilon = 1e-12);
    }

    #[test]
    fn survives_weights_spanning_hundreds_of_log_units() {
        // exp(710) overflows an f64, exp(-750) underflows to zero
        let x = array![710.0, 709.0, -750.0, 400.0];
        let expected = 710.0 + (1.0 + (-1.0f64).exp()).ln();
        let streamed: LogSumExp = x.iter().copied().collect();
        assert!(streamed.value().is_finite());
        assert_relative_eq!(streamed.value(), expected, epsilon = 1e-9);
    }

    #[test]
    fn tiny_terms_do_not_vanish_relative_to_each_other() {
        let streamed: LogSumExp = vec![-800.0, -800.0].into_iter().collect();
        assert_relative_eq!(streamed.value(), -800.0 + 2f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn streaming_handles_increasing_maximum() {
        let mut acc = LogSumExp::new();
        for x in &[-400.0, 0.0, 350.0] {
            acc.add(*x);
        }
        let expected = 350.0 + (1.0 + (-350.0f64).exp() + (-750.0f64).exp()).ln();
        assert_relative_eq!(acc.value(), expected, epsilon = 1e-12);
        assert_eq!(acc.terms(), 3);
    }

    #[test]
    fn negative_infinity_terms_carry_no_mass() {
        let streamed: LogSumExp = vec![f64::NEG_INFINITY, 1.0].into_iter().collect();
        assert_relative_eq!(streamed.value(), 1.0);
        assert_eq!(streamed.terms(), 2);

        let nothing: LogSumExp = vec![f64::NEG_INFINITY; 3].into_iter().collect();
        assert_eq!(nothing.value(), f64::NEG_INFINITY);
    }

    #[test]
    fn relative_variance_of_exact_value_is_zero() {
        assert_eq!(relative_variance(0.0, 0.0), 0.0);
        assert_relative_eq!(relative_variance(0.5, 0.05), 0.01);
    }
}
