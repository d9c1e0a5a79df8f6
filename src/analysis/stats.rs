//! Descriptive statistics over plain `f64` columns

use serde::Serialize;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator)
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Quantile with linear interpolation between closest ranks; NaNs are ignored
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Rescale to `[0, 1]`; a constant column maps to NaN like a 0/0 division would
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// Fraction of values inside `[low, high]`
pub fn share_between(values: &[f64], low: f64, high: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| (low..=high).contains(*v)).count() as f64 / values.len() as f64
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Count, mean, spread and quartiles of one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Describe {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub max: f64,
}

impl Describe {
    /// `None` for an empty column; `std` is NaN for a single value
    pub fn of(values: &[f64]) -> Option<Self> {
        Some(Self {
            count: values.len(),
            mean: mean(values)?,
            std: sample_std(values).unwrap_or(f64::NAN),
            min: quantile(values, 0.0)?,
            q25: quantile(values, 0.25)?,
            q50: quantile(values, 0.5)?,
            q75: quantile(values, 0.75)?,
            max: quantile(values, 1.0)?,
        })
    }

    pub fn render(&self) -> String {
        let rows = [
            ("count", self.count as f64),
            ("mean", self.mean),
            ("std", self.std),
            ("min", self.min),
            ("25%", self.q25),
            ("50%", self.q50),
            ("75%", self.q75),
            ("max", self.max),
        ];
        rows.iter()
            .map(|(name, value)| format!("  {:<8} {:>18.6}", name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 1.0), Some(4.0));
        assert_eq!(quantile(&values, 0.5), Some(2.5));
        assert!((quantile(&values, 0.9).unwrap() - 3.7).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_describe_uses_sample_std() {
        let d = Describe::of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(d.count, 8);
        assert_eq!(d.mean, 5.0);
        assert!((d.std - 2.138089935299395).abs() < 1e-12);
        assert_eq!(d.q50, 4.5);
        assert!(Describe::of(&[]).is_none());
        assert!(Describe::of(&[1.0]).unwrap().std.is_nan());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&[10.0, 15.0, 20.0]), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_share_between_is_inclusive() {
        let values = [0.0, 0.05, 0.1, 0.2];
        assert_eq!(share_between(&values, 0.0, 0.1), 0.75);
    }
}
