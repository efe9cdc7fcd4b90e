use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::config::RegressionConfig;
use crate::error::{ForecastError, Result};

/// Linear predictors are clamped here before exponentiation.
const ETA_BOUND: f64 = 30.0;
const MAX_HALVINGS: usize = 40;
const ARMIJO: f64 = 1e-4;

/// Per-feature standardisation fitted on training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Population standard deviation; constant columns get scale 1.
    pub fn fit(x: &DMatrix<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mut mean = Vec::with_capacity(x.ncols());
        let mut scale = Vec::with_capacity(x.ncols());
        for col in x.column_iter() {
            let m = col.sum() / n;
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            let sd = var.sqrt();
            mean.push(m);
            scale.push(if sd > 1e-12 && sd.is_finite() { sd } else { 1.0 });
        }
        Self { mean, scale }
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| (x[(i, j)] - self.mean[j]) / self.scale[j])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoissonFit {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl PoissonFit {
    /// Expected count `exp(intercept + w·x)`.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let eta = self.intercept
            + self
                .coefficients
                .iter()
                .zip(x)
                .map(|(w, v)| w * v)
                .sum::<f64>();
        eta.clamp(-ETA_BOUND, ETA_BOUND).exp()
    }
}

/// L2-penalised Poisson regression with log link.
///
/// Minimises `(1/n) Σ (μ - y·η) + (α/2)‖w‖²` by Newton steps with
/// backtracking. The intercept is not penalised.
pub fn fit_poisson(x: &DMatrix<f64>, y: &DVector<f64>, cfg: &RegressionConfig) -> Result<PoissonFit> {
    let (n, p) = x.shape();
    if n != y.len() {
        return Err(ForecastError::Numerical(format!(
            "design has {} rows but target has {}",
            n,
            y.len()
        )));
    }
    if n <= p {
        return Err(ForecastError::InsufficientData {
            context: "poisson regression".to_string(),
            rows: n,
            required: p + 1,
        });
    }
    if y.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(ForecastError::Numerical(
            "goal targets must be finite and non-negative".to_string(),
        ));
    }

    let inv_n = 1.0 / n as f64;
    let design = DMatrix::from_fn(n, p + 1, |i, j| if j == 0 { 1.0 } else { x[(i, j - 1)] });

    let mut beta = DVector::zeros(p + 1);
    let mean_y = y.sum() * inv_n;
    if mean_y > 0.0 {
        beta[0] = mean_y.ln();
    }

    let objective = |beta: &DVector<f64>| -> f64 {
        let eta = (&design * beta).map(|e| e.clamp(-ETA_BOUND, ETA_BOUND));
        let mu_sum: f64 = eta.iter().map(|e| e.exp()).sum();
        (mu_sum - y.dot(&eta)) * inv_n + 0.5 * cfg.alpha * beta.rows(1, p).norm_squared()
    };

    let mut current = objective(&beta);
    let mut iterations = 0;
    let mut converged = false;

    while iterations < cfg.max_iter {
        let eta = (&design * &beta).map(|e| e.clamp(-ETA_BOUND, ETA_BOUND));
        let mu = eta.map(f64::exp);

        let mut grad = design.tr_mul(&(&mu - y)) * inv_n;
        for j in 1..=p {
            grad[j] += cfg.alpha * beta[j];
        }
        if grad.amax() < cfg.tol {
            converged = true;
            break;
        }
        iterations += 1;

        let mut weighted = design.clone();
        for (i, mut row) in weighted.row_iter_mut().enumerate() {
            row *= mu[i];
        }
        let mut hessian = design.tr_mul(&weighted) * inv_n;
        for j in 1..=p {
            hessian[(j, j)] += cfg.alpha;
        }

        let step = solve_spd(hessian, &grad)?;
        let decrease = grad.dot(&step);

        let mut t = 1.0;
        let mut accepted = false;
        for _ in 0..MAX_HALVINGS {
            let candidate = &beta - &step * t;
            let value = objective(&candidate);
            if value.is_finite() && value <= current - ARMIJO * t * decrease {
                beta = candidate;
                current = value;
                accepted = true;
                break;
            }
            t *= 0.5;
        }
        if !accepted {
            // No descent left along the Newton direction.
            converged = grad.amax() < cfg.tol.sqrt();
            break;
        }
    }

    if !converged {
        tracing::warn!(
            "Poisson fit stopped after {} iterations without reaching tol {}",
            iterations,
            cfg.tol
        );
    }
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(ForecastError::Numerical("non-finite coefficients".to_string()));
    }

    Ok(PoissonFit {
        intercept: beta[0],
        coefficients: beta.rows(1, p).iter().copied().collect(),
        iterations,
        converged,
    })
}

fn solve_spd(mut hessian: DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
    let dim = hessian.nrows();
    for jitter in [0.0, 1e-10, 1e-8, 1e-6] {
        if jitter > 0.0 {
            for j in 0..dim {
                hessian[(j, j)] += jitter;
            }
        }
        if let Some(chol) = hessian.clone().cholesky() {
            return Ok(chol.solve(rhs));
        }
    }
    Err(ForecastError::Numerical(
        "Hessian is not positive definite".to_string(),
    ))
}

/// Unit Poisson deviance averaged over observations.
pub fn mean_deviance(y: &[f64], mu: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let total: f64 = y
        .iter()
        .zip(mu)
        .map(|(&obs, &pred)| {
            let log_term = if obs > 0.0 { obs * (obs / pred).ln() } else { 0.0 };
            2.0 * (log_term - (obs - pred))
        })
        .sum();
    total / y.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Poisson};

    fn loose() -> RegressionConfig {
        RegressionConfig {
            alpha: 1e-6,
            ..Default::default()
        }
    }

    #[test]
    fn scaler_uses_population_std_and_guards_constants() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 5.0, 2.0, 5.0, 3.0, 5.0, 4.0, 5.0]);
        let s = StandardScaler::fit(&x);
        assert_eq!(s.mean, vec![2.5, 5.0]);
        assert!((s.scale[0] - 1.25f64.sqrt()).abs() < 1e-12);
        assert_eq!(s.scale[1], 1.0);
        assert_eq!(s.transform_row(&[2.5, 5.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn intercept_only_fit_recovers_log_mean() {
        // One zero-variance column keeps the design non-degenerate after penalty.
        let x = DMatrix::from_element(6, 1, 0.0);
        let y = DVector::from_vec(vec![0.0, 1.0, 2.0, 3.0, 1.0, 2.0]);
        let fit = fit_poisson(&x, &y, &RegressionConfig::default()).unwrap();
        assert!(fit.converged);
        assert!((fit.intercept - 1.5f64.ln()).abs() < 1e-6);
        assert!((fit.predict(&[0.0]) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn recovers_known_coefficients() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n = 20_000;
        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(n);
        for i in 0..n {
            let v = (i % 21) as f64 / 10.0 - 1.0;
            let lambda = (0.3 + 0.5 * v).exp();
            xs.push(v);
            ys.push(Poisson::new(lambda).unwrap().sample(&mut rng));
        }
        let x = DMatrix::from_vec(n, 1, xs);
        let y = DVector::from_vec(ys);
        let fit = fit_poisson(&x, &y, &loose()).unwrap();
        assert!(fit.converged);
        assert!((fit.intercept - 0.3).abs() < 0.05, "intercept {}", fit.intercept);
        assert!((fit.coefficients[0] - 0.5).abs() < 0.05, "slope {}", fit.coefficients[0]);
    }

    #[test]
    fn penalty_shrinks_slope() {
        let x = DMatrix::from_row_slice(6, 1, &[-1.0, -1.0, 0.0, 0.0, 1.0, 1.0]);
        let y = DVector::from_vec(vec![0.0, 1.0, 1.0, 2.0, 3.0, 4.0]);
        let weak = fit_poisson(&x, &y, &loose()).unwrap();
        let strong = fit_poisson(
            &x,
            &y,
            &RegressionConfig {
                alpha: 10.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(strong.coefficients[0].abs() < weak.coefficients[0].abs());
        assert!(strong.coefficients[0] > 0.0);
    }

    #[test]
    fn too_few_rows_is_insufficient_data() {
        let x = DMatrix::from_element(2, 2, 1.0);
        let y = DVector::from_vec(vec![1.0, 2.0]);
        assert!(matches!(
            fit_poisson(&x, &y, &RegressionConfig::default()),
            Err(ForecastError::InsufficientData { rows: 2, required: 3, .. })
        ));
    }

    #[test]
    fn deviance_is_zero_for_perfect_predictions() {
        assert_eq!(mean_deviance(&[0.0, 2.0], &[0.0, 2.0]), 0.0);
        assert!(mean_deviance(&[1.0, 3.0], &[2.0, 2.0]) > 0.0);
    }
}
