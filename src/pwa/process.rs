//! Moisture loss and enzyme activity as a function of temperature and state.
//!
//! Both rates share an Arrhenius rate constant:
//!
//! ```text
//! k(T)   = k_ref · exp((E_a / R_g) · (1/T_ref − 1/T))
//! f_H    = −k(T) · H · Enz
//! f_Enz  =  k(T) · H · Enz
//! ```
//!
//! Samples are rows `[T, H, Enz]`.

use rand::Rng;

/// Rate constant at the reference temperature.
pub const K_REF: f64 = 0.0019;
/// Activation energy (kJ/mol).
pub const ACTIVATION_ENERGY: f64 = 170.604;
/// Reference temperature (K).
pub const T_REF: f64 = 288.15;
/// Gas constant (kJ/(mol·K)).
pub const GAS_CONSTANT: f64 = 0.008314;

/// Number of state variables in a sample row.
pub const N_PREDICTORS: usize = 3;

/// Arrhenius rate constant at temperature `t` (K).
pub fn rate_constant(t: f64) -> f64 {
    K_REF * ((ACTIVATION_ENERGY / GAS_CONSTANT) * (1.0 / T_REF - 1.0 / t)).exp()
}

/// Which rate the surrogate models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Moisture loss `f_H`.
    Moisture,
    /// Enzyme activity `f_Enz`.
    Enzyme,
}

impl Target {
    /// Both targets, in a fixed order.
    pub const ALL: [Target; 2] = [Target::Moisture, Target::Enzyme];

    /// Rate at temperature `t`, moisture `h` and enzyme level `enz`.
    pub fn rate(self, t: f64, h: f64, enz: f64) -> f64 {
        let r = rate_constant(t) * h * enz;
        match self {
            Target::Moisture => -r,
            Target::Enzyme => r,
        }
    }

    /// Rate for every `[T, H, Enz]` row.
    ///
    /// # Panics
    ///
    /// Panics if a row has fewer than [`N_PREDICTORS`] entries.
    pub fn rates(self, samples: &[Vec<f64>]) -> Vec<f64> {
        samples
            .iter()
            .map(|s| self.rate(s[0], s[1], s[2]))
            .collect()
    }

    /// Short name used in logs and demo output.
    pub fn name(self) -> &'static str {
        match self {
            Target::Moisture => "f_H",
            Target::Enzyme => "f_Enz",
        }
    }
}

/// Half-open ranges the state variables are drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleBounds {
    /// Temperature (K).
    pub temperature: (f64, f64),
    /// Moisture.
    pub moisture: (f64, f64),
    /// Enzyme level.
    pub enzyme: (f64, f64),
}

impl Default for SampleBounds {
    fn default() -> Self {
        Self {
            temperature: (278.0, 298.0),
            moisture: (40.0, 65.0),
            enzyme: (90.0, 110.0),
        }
    }
}

impl SampleBounds {
    /// Draw `n` rows of whole-number states, each variable uniform over its range.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Vec<f64>> {
        let draw = |rng: &mut R, (lo, hi): (f64, f64)| -> f64 {
            let (lo, hi) = (lo.ceil() as i64, hi.ceil() as i64);
            if hi <= lo {
                lo as f64
            } else {
                rng.random_range(lo..hi) as f64
            }
        };
        (0..n)
            .map(|_| {
                vec![
                    draw(rng, self.temperature),
                    draw(rng, self.moisture),
                    draw(rng, self.enzyme),
                ]
            })
            .collect()
    }

    /// Draw `n` rows with each variable uniform over its continuous range.
    pub fn sample_continuous<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Vec<f64>> {
        let draw = |rng: &mut R, (lo, hi): (f64, f64)| -> f64 {
            if hi <= lo {
                lo
            } else {
                rng.random_range(lo..hi)
            }
        };
        (0..n)
            .map(|_| {
                vec![
                    draw(rng, self.temperature),
                    draw(rng, self.moisture),
                    draw(rng, self.enzyme),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn rate_constant_at_reference_temperature() {
        assert_relative_eq!(rate_constant(T_REF), K_REF, max_relative = 1e-12);
        assert!(rate_constant(T_REF + 5.0) > K_REF);
        assert!(rate_constant(T_REF - 5.0) < K_REF);
    }

    #[test]
    fn moisture_and_enzyme_rates_mirror_each_other() {
        let (t, h, e) = (290.0, 50.0, 100.0);
        assert_relative_eq!(
            Target::Moisture.rate(t, h, e),
            -Target::Enzyme.rate(t, h, e),
            max_relative = 1e-12
        );
        assert!(Target::Enzyme.rate(t, h, e) > 0.0);
    }

    #[test]
    #[should_panic]
    fn short_rows_have_no_rate() {
        Target::Moisture.rates(&[vec![290.0, 50.0]]);
    }

    #[test]
    fn integer_samples_stay_in_bounds() {
        let bounds = SampleBounds::default();
        let mut rng = StdRng::seed_from_u64(0);
        let samples = bounds.sample(200, &mut rng);
        assert_eq!(samples.len(), 200);
        for s in &samples {
            assert_eq!(s.len(), N_PREDICTORS);
            assert!((278.0..298.0).contains(&s[0]));
            assert!((40.0..65.0).contains(&s[1]));
            assert!((90.0..110.0).contains(&s[2]));
            assert!(s.iter().all(|v| v.fract() == 0.0));
        }
    }

    #[test]
    fn sampling_is_reproducible() {
        let bounds = SampleBounds::default();
        let a = bounds.sample_continuous(20, &mut StdRng::seed_from_u64(3));
        let b = bounds.sample_continuous(20, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }
}
