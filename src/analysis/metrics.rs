use serde::{Deserialize, Serialize};

use crate::error::{DppError, Result};

/// Which observables to extract from the somatic trace, and how.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// mV
    pub spike_threshold: f64,
    /// Averaging window (ms) ending at stimulus onset; 0 takes the single
    /// sample before onset.
    pub baseline_window: f64,
    pub plateau: bool,
    pub spikes: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            spike_threshold: 0.0,
            baseline_window: 0.0,
            plateau: true,
            spikes: true,
        }
    }
}

/// Drops the samples before the one preceding `time`.
pub fn exclude_at_start<'a>(tm: &'a [f64], vm: &'a [f64], time: f64) -> (&'a [f64], &'a [f64]) {
    let start = tm
        .iter()
        .position(|&t| t >= time)
        .unwrap_or(tm.len())
        .saturating_sub(1);
    (&tm[start..], &vm[start.min(vm.len())..])
}

pub fn baseline(tm: &[f64], vm: &[f64], onset: f64, window: f64) -> Result<f64> {
    if tm.len() != vm.len() {
        return Err(DppError::InvalidArgument(format!(
            "time ({}) and voltage ({}) traces differ in length",
            tm.len(),
            vm.len()
        )));
    }

    let before = tm.iter().take_while(|&&t| t < onset).count();
    if before == 0 {
        return Err(DppError::Domain(format!(
            "no samples recorded before onset at {onset} ms"
        )));
    }

    if window <= 0.0 {
        return Ok(vm[before - 1]);
    }

    let samples: Vec<f64> = tm[..before]
        .iter()
        .zip(&vm[..before])
        .filter(|&(&t, _)| t >= onset - window)
        .map(|(_, &v)| v)
        .collect();
    Ok(samples.iter().sum::<f64>() / samples.len() as f64)
}

fn peak(vm: &[f64]) -> Result<f64> {
    vm.iter()
        .copied()
        .reduce(f64::max)
        .ok_or_else(|| DppError::Domain("empty voltage trace".to_string()))
}

/// Width (ms) of the single run of samples at or above half of peak plus
/// baseline. A trace that dips below half-max and recovers has more than
/// one event and is rejected.
pub fn plateau_duration(tm: &[f64], vm: &[f64], base: f64) -> Result<f64> {
    let half_max = (peak(vm)? + base) / 2.0;

    let above: Vec<usize> = vm
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v >= half_max)
        .map(|(i, _)| i)
        .collect();

    let (first, last) = match (above.first(), above.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return Err(DppError::Domain("no sample reaches half-max".to_string())),
    };
    if last - first + 1 != above.len() {
        return Err(DppError::Domain(format!(
            "trace crosses half-max ({half_max:.2} mV) more than once"
        )));
    }

    Ok(tm[last] - tm[first])
}

pub fn plateau_amplitude(vm: &[f64], base: f64) -> Result<f64> {
    Ok(peak(vm)? - base)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpikeSummary {
    pub spiked: bool,
    pub first_spike: Option<f64>,
    pub count: usize,
}

/// Threshold crossings; after a spike the voltage has to fall back to the
/// threshold before the next one counts.
pub fn spike_summary(tm: &[f64], vm: &[f64], threshold: f64) -> SpikeSummary {
    let mut summary = SpikeSummary::default();
    let mut ready = true;

    for (&t, &v) in tm.iter().zip(vm) {
        if v <= threshold {
            ready = true;
        } else {
            if summary.first_spike.is_none() {
                summary.first_spike = Some(t);
                summary.spiked = true;
            }
            if ready {
                summary.count += 1;
                ready = false;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> (Vec<f64>, Vec<f64>) {
        let vm: Vec<f64> = (0..=20)
            .map(|i| if i <= 10 { 2.0 * i as f64 } else { 2.0 * (20 - i) as f64 })
            .collect();
        let tm = (0..=20).map(|i| i as f64).collect();
        (tm, vm)
    }

    #[test]
    fn half_max_duration_of_a_triangle() {
        let (tm, vm) = triangle();
        let dur = plateau_duration(&tm, &vm, 0.0).unwrap();
        assert!((dur - 10.0).abs() < 1e-12);
        assert_eq!(plateau_amplitude(&vm, 0.0).unwrap(), 20.0);
    }

    #[test]
    fn half_max_below_zero_from_resting_baseline() {
        // rest at -80 mV, onset at 5 ms, 0 mV peak at 15 ms
        let tm: Vec<f64> = (0..=30).map(f64::from).collect();
        let vm: Vec<f64> = tm
            .iter()
            .map(|&t| {
                let from_peak = (t - 15.0).abs();
                if from_peak >= 10.0 { -80.0 } else { -8.0 * from_peak }
            })
            .collect();

        let base = baseline(&tm, &vm, 5.0, 0.0).unwrap();
        assert_eq!(base, -80.0);
        assert_eq!(vm[10], -40.0);
        assert_eq!(vm[20], -40.0);
        let dur = plateau_duration(&tm, &vm, base).unwrap();
        assert!((dur - 10.0).abs() < 1e-12);
        assert_eq!(plateau_amplitude(&vm, base).unwrap(), 80.0);
    }

    #[test]
    fn two_peaks_are_a_domain_error() {
        let tm: Vec<f64> = (0..7).map(f64::from).collect();
        let vm = [0.0, 10.0, 0.0, 0.0, 10.0, 0.0, 0.0];
        assert!(matches!(
            plateau_duration(&tm, &vm, 0.0),
            Err(DppError::Domain(_))
        ));
        assert!(plateau_duration(&[], &[], 0.0).is_err());
    }

    #[test]
    fn spike_count_needs_recovery_below_threshold() {
        let vm = [-10.0, 5.0, 5.0, -10.0, 5.0, -10.0, 5.0];
        let tm: Vec<f64> = (0..vm.len()).map(|i| i as f64 * 0.5).collect();

        let summary = spike_summary(&tm, &vm, 0.0);
        assert_eq!(summary.count, 3);
        assert!(summary.spiked);
        assert_eq!(summary.first_spike, Some(0.5));

        let quiet = spike_summary(&tm, &vm, 10.0);
        assert_eq!(quiet, SpikeSummary::default());
    }

    #[test]
    fn baseline_uses_sample_before_onset_or_window_mean() {
        let tm: Vec<f64> = (0..10).map(f64::from).collect();
        let vm: Vec<f64> = (0..10).map(|i| -80.0 + i as f64).collect();

        assert_eq!(baseline(&tm, &vm, 5.0, 0.0).unwrap(), -76.0);
        // samples at 3 and 4 ms
        assert_eq!(baseline(&tm, &vm, 5.0, 2.0).unwrap(), -76.5);
        assert!(matches!(
            baseline(&tm, &vm, 0.0, 0.0),
            Err(DppError::Domain(_))
        ));
    }

    #[test]
    fn exclusion_keeps_one_sample_before_cutoff() {
        let tm: Vec<f64> = (0..10).map(f64::from).collect();
        let vm = tm.clone();
        let (t, v) = exclude_at_start(&tm, &vm, 4.0);
        assert_eq!(t.first(), Some(&3.0));
        assert_eq!(t.len(), v.len());
        assert_eq!(exclude_at_start(&tm, &vm, 100.0).0, &[9.0]);
    }
}
