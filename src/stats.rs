use serde::Serialize;

/// Descriptive statistics over the finite part of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Description {
    /// Number of finite samples used.
    pub count: usize,
    /// Number of NaN or infinite samples left out.
    pub non_finite: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub median: f64,
}

impl Description {
    pub fn has_non_finite(&self) -> bool {
        self.non_finite > 0
    }
}

/// Describe `values`, ignoring non-finite entries. With no finite samples every
/// statistic is NaN. The standard deviation uses n - 1 degrees of freedom and is
/// zero for a single sample.
pub fn describe(values: &[f64]) -> Description {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let non_finite = values.len() - finite.len();
    if finite.is_empty() {
        return Description {
            count: 0,
            non_finite,
            min: f64::NAN,
            max: f64::NAN,
            mean: f64::NAN,
            std: f64::NAN,
            median: f64::NAN,
        };
    }
    finite.sort_by(|a, b| a.total_cmp(b));

    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let std = if finite.len() > 1 {
        (finite.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    Description {
        count: finite.len(),
        non_finite,
        min: finite[0],
        max: finite[finite.len() - 1],
        mean,
        std,
        median: percentile(&finite, 0.5),
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_population(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    (values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Finite min and max of `values`, if any.
pub fn finite_min_max(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Linear-interpolated percentile of already sorted data.
pub fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    let n = sorted_data.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted_data[0];
    }

    let rank = p * (n - 1) as f64;
    let lower_idx = rank.floor() as usize;
    let upper_idx = rank.ceil() as usize;

    if lower_idx == upper_idx {
        sorted_data[lower_idx]
    } else {
        let weight = rank - lower_idx as f64;
        sorted_data[lower_idx] * (1.0 - weight) + sorted_data[upper_idx] * weight
    }
}
