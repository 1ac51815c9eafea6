//! Risk certificates: seeded percentile-bootstrap confidence intervals.
//!
//! A certificate states a `1 - alpha` coverage target for the interval it
//! carries. The guarantee is statistical; [`empirical_coverage`] measures it
//! over many certificates against a known true value.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::aggregation::compensated_sum;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateSettings {
    pub alpha: f64,
    pub resamples: usize,
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            resamples: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCertificate {
    pub node_id: String,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub alpha: f64,
    /// Stated coverage, `1 - alpha`.
    pub coverage_target: f64,
    pub resamples: usize,
    pub sample_size: usize,
    pub seed: u64,
}

impl RiskCertificate {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

fn mean(values: &[f64]) -> f64 {
    compensated_sum(values.iter().copied()) / values.len() as f64
}

/// Percentile bootstrap interval for the mean of `samples`.
///
/// Returns `None` when there is nothing to resample or the settings are out
/// of range.
pub fn bootstrap_mean(
    node_id: &str,
    samples: &[f64],
    settings: &CertificateSettings,
    seed: u64,
) -> Option<RiskCertificate> {
    if samples.is_empty() || settings.resamples == 0 || !(0.0..1.0).contains(&settings.alpha) || settings.alpha == 0.0 {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let n = samples.len();
    let mut draw = vec![0.0; n];
    let mut means = Vec::with_capacity(settings.resamples);
    for _ in 0..settings.resamples {
        for slot in draw.iter_mut() {
            *slot = samples[rng.gen_range(0..n)];
        }
        means.push(mean(&draw));
    }
    means.sort_by(f64::total_cmp);

    let last = means.len() - 1;
    let lower_index = ((settings.alpha / 2.0) * means.len() as f64).floor() as usize;
    let upper_index = (((1.0 - settings.alpha / 2.0) * means.len() as f64).ceil() as usize)
        .saturating_sub(1)
        .min(last);

    Some(RiskCertificate {
        node_id: node_id.to_string(),
        estimate: mean(samples),
        lower: means[lower_index.min(last)],
        upper: means[upper_index],
        alpha: settings.alpha,
        coverage_target: 1.0 - settings.alpha,
        resamples: settings.resamples,
        sample_size: n,
        seed,
    })
}

/// Fraction of certificates whose interval contains `true_value`.
pub fn empirical_coverage(certificates: &[RiskCertificate], true_value: f64) -> f64 {
    if certificates.is_empty() {
        return 0.0;
    }
    let hits = certificates.iter().filter(|c| c.contains(true_value)).count();
    hits as f64 / certificates.len() as f64
}
