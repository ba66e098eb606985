use crate::forecast::ForecastError;

/// A simple time series for statistical analysis.
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self
            .values
            .iter()
            .map(|&x| (x - mean).powi(2))
            .sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// std / |mean|; zero when the mean is zero.
    pub fn coefficient_of_variation(&self) -> f64 {
        let mean = self.mean();
        if mean.abs() < f64::EPSILON {
            return 0.0;
        }
        self.std_dev() / mean.abs()
    }

    /// Autocorrelation at `lag`, or `None` for short or constant series.
    pub fn autocorrelation(&self, lag: usize) -> Option<f64> {
        let n = self.values.len();
        if lag == 0 || n <= lag {
            return None;
        }
        let mean = self.mean();
        let denom: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        if denom == 0.0 {
            return None;
        }
        let num: f64 = (lag..n)
            .map(|i| (self.values[i] - mean) * (self.values[i - lag] - mean))
            .sum();
        Some(num / denom)
    }
}

/// Ordinary least squares fit of `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation of x and y; zero when y is constant.
    pub r: f64,
    pub r_squared: f64,
    /// Mean squared residual.
    pub mse: f64,
    pub n: usize,
}

impl LinearFit {
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self, ForecastError> {
        let n = xs.len().min(ys.len());
        if n < 2 {
            return Err(ForecastError::InsufficientData { needed: 2, have: n });
        }
        let (xs, ys) = (&xs[..n], &ys[..n]);
        let nf = n as f64;
        let mean_x = xs.iter().sum::<f64>() / nf;
        let mean_y = ys.iter().sum::<f64>() / nf;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        let mut syy = 0.0;
        for (&x, &y) in xs.iter().zip(ys) {
            let dx = x - mean_x;
            let dy = y - mean_y;
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }
        if sxx == 0.0 {
            return Err(ForecastError::DegenerateSeries);
        }

        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;
        let r = if syy == 0.0 { 0.0 } else { sxy / (sxx * syy).sqrt() };

        let sse: f64 = xs
            .iter()
            .zip(ys)
            .map(|(&x, &y)| (y - (slope * x + intercept)).powi(2))
            .sum();

        Ok(Self {
            slope,
            intercept,
            r,
            r_squared: r * r,
            mse: sse / nf,
            n,
        })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats() {
        let ts = TimeSeries::new(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(ts.mean(), 3.0);
        // Population variance of 1..5 is 2.0
        assert!((ts.variance() - 2.0).abs() < 1e-12);
        assert!((ts.coefficient_of_variation() - 2f64.sqrt() / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_autocorrelation() {
        let alternating = TimeSeries::new(vec![1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0]);
        assert!(alternating.autocorrelation(1).unwrap() < -0.8);

        let constant = TimeSeries::new(vec![4.0; 12]);
        assert_eq!(constant.autocorrelation(1), None);
        assert_eq!(TimeSeries::new(vec![1.0]).autocorrelation(1), None);
    }

    #[test]
    fn test_exact_line_fit() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 + 2.0 * x).collect();
        let fit = LinearFit::fit(&xs, &ys).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 3.0).abs() < 1e-12);
        assert!((fit.r - 1.0).abs() < 1e-12);
        assert!(fit.mse < 1e-20);
        assert!((fit.predict(20.0) - 43.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_rejects_degenerate_input() {
        assert_eq!(
            LinearFit::fit(&[1.0], &[1.0]),
            Err(ForecastError::InsufficientData { needed: 2, have: 1 })
        );
        assert_eq!(
            LinearFit::fit(&[5.0, 5.0, 5.0], &[1.0, 2.0, 3.0]),
            Err(ForecastError::DegenerateSeries)
        );
    }

    #[test]
    fn test_flat_series_has_zero_correlation() {
        let fit = LinearFit::fit(&[0.0, 1.0, 2.0], &[7.0, 7.0, 7.0]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.r, 0.0);
    }
}
