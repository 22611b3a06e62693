//! Least-squares polynomial fitting in the Chebyshev basis.
//!
//! Fitting happens offline, before a model is built. The pipeline is:
//!
//! 1. map every sample `x` from the fitting domain `[lo, hi]` into the Chebyshev
//!    window `[-1, 1]`;
//! 2. solve the (optionally weighted) least-squares problem for Chebyshev
//!    coefficients with a column-normalized Householder QR;
//! 3. convert Chebyshev coefficients to monomial coefficients in the window variable;
//! 4. compose with the affine window map to get monomial coefficients in `x`;
//! 5. attach the input scale the polynomial will be evaluated at.
//!
//! Step 5 does not touch the coefficients: [`PolynomialCoefficients`] applies the
//! scale at evaluation time and exposes the raw-domain form via `to_monomial`.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::{Error, PolynomialCoefficients, Result};

/// Configured fitter: degree, fitting domain and evaluation scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialFitter {
    degree: usize,
    domain: [f64; 2],
    scale: f64,
}

impl PolynomialFitter {
    pub fn new(degree: usize, domain: [f64; 2]) -> Result<Self> {
        if degree == 0 {
            return Err(Error::InvalidConfig(
                "polynomial degree must be >= 1".to_owned(),
            ));
        }
        let [lo, hi] = domain;
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(Error::InvalidConfig(format!(
                "fitting domain must be finite with lo < hi, got [{lo}, {hi}]"
            )));
        }
        Ok(Self {
            degree,
            domain,
            scale: 1.0,
        })
    }

    /// Scale the fitted polynomial is evaluated at (see [`PolynomialCoefficients::eval`]).
    pub fn with_scale(mut self, scale: f64) -> Result<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "scale must be finite and > 0, got {scale}"
            )));
        }
        self.scale = scale;
        Ok(self)
    }

    #[inline]
    pub fn degree(&self) -> usize {
        self.degree
    }

    #[inline]
    pub fn domain(&self) -> [f64; 2] {
        self.domain
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Unweighted least-squares fit of `(x, y)` samples.
    pub fn fit(&self, samples: &[(f64, f64)]) -> Result<PolynomialCoefficients> {
        self.fit_impl(samples, None)
    }

    /// Weighted fit; `weights[i]` multiplies the unsquared residual of sample `i`.
    pub fn fit_weighted(
        &self,
        samples: &[(f64, f64)],
        weights: &[f64],
    ) -> Result<PolynomialCoefficients> {
        if weights.len() != samples.len() {
            return Err(Error::InvalidConfig(format!(
                "weights length {} does not match samples length {}",
                weights.len(),
                samples.len()
            )));
        }
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(Error::InvalidConfig(
                "weights must be finite and >= 0".to_owned(),
            ));
        }
        self.fit_impl(samples, Some(weights))
    }

    /// Fit `f` so that `scale * p(x / scale)` approximates `f(x)`.
    ///
    /// `xs` are points of the normalized domain; the target at `t` is
    /// `f(scale * t) / scale`.
    pub fn fit_fn(&self, f: impl Fn(f64) -> f64, xs: &[f64]) -> Result<PolynomialCoefficients> {
        let s = self.scale;
        let samples: Vec<(f64, f64)> = xs.iter().map(|&t| (t, f(s * t) / s)).collect();
        self.fit(&samples)
    }

    fn fit_impl(
        &self,
        samples: &[(f64, f64)],
        weights: Option<&[f64]>,
    ) -> Result<PolynomialCoefficients> {
        let m = self.degree + 1;
        if samples.is_empty() {
            return Err(Error::InsufficientData(
                "cannot fit a polynomial to zero samples".to_owned(),
            ));
        }
        if samples.iter().any(|(x, y)| !(x.is_finite() && y.is_finite())) {
            return Err(Error::InvalidData(
                "samples must contain only finite values".to_owned(),
            ));
        }
        let distinct = distinct_count(samples.iter().map(|s| s.0));
        if distinct < m {
            return Err(Error::InsufficientData(format!(
                "degree {} fit needs at least {m} distinct x values, got {distinct}",
                self.degree
            )));
        }

        let [lo, hi] = self.domain;
        let a = 2.0 / (hi - lo);
        let b = -(hi + lo) / (hi - lo);

        // Column-major weighted Chebyshev Vandermonde matrix.
        let n = samples.len();
        let mut cols = vec![vec![0.0; n]; m];
        let mut rhs = vec![0.0; n];
        for (i, &(x, y)) in samples.iter().enumerate() {
            let w = weights.map_or(1.0, |w| w[i]);
            let t = a * x + b;
            let mut prev = 1.0;
            let mut cur = t;
            cols[0][i] = w;
            if m > 1 {
                cols[1][i] = w * t;
            }
            for col in cols.iter_mut().skip(2) {
                let next = 2.0 * t * cur - prev;
                prev = cur;
                cur = next;
                col[i] = w * next;
            }
            rhs[i] = w * y;
        }

        // Normalize columns for conditioning.
        let mut col_scale = vec![1.0; m];
        for (col, s) in cols.iter_mut().zip(col_scale.iter_mut()) {
            let norm = col.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                *s = norm;
                for v in col.iter_mut() {
                    *v /= norm;
                }
            }
        }

        let mut cheb = least_squares(&mut cols, &mut rhs)?;
        for (c, s) in cheb.iter_mut().zip(&col_scale) {
            *c /= s;
        }

        let window = chebyshev_to_monomial(&cheb);
        let coefficients = compose_affine(&window, a, b);

        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(Error::InsufficientData(
                "least-squares fit produced non-finite coefficients".to_owned(),
            ));
        }

        log::debug!(
            "fitted degree {} polynomial on [{lo}, {hi}] scale {}: chebyshev={cheb:?} monomial={coefficients:?}",
            self.degree,
            self.scale
        );

        PolynomialCoefficients::new(coefficients, self.scale)
    }
}

/// Fit a degree-`degree` polynomial to `samples` over `domain` (scale 1).
pub fn fit(
    samples: &[(f64, f64)],
    degree: usize,
    domain: [f64; 2],
) -> Result<PolynomialCoefficients> {
    PolynomialFitter::new(degree, domain)?.fit(samples)
}

/// Convert Chebyshev-series coefficients to monomial coefficients.
///
/// Uses the recurrence `T_{k+1}(t) = 2 t T_k(t) - T_{k-1}(t)`.
pub fn chebyshev_to_monomial(cheb: &[f64]) -> Vec<f64> {
    let n = cheb.len();
    let mut out = vec![0.0; n];
    if n == 0 {
        return out;
    }

    let mut prev = vec![0.0; n];
    prev[0] = 1.0;
    out[0] += cheb[0];
    if n == 1 {
        return out;
    }

    let mut cur = vec![0.0; n];
    cur[1] = 1.0;
    out[1] += cheb[1];

    for &c in &cheb[2..] {
        let mut next = vec![0.0; n];
        for i in 0..n {
            let shifted = if i > 0 { 2.0 * cur[i - 1] } else { 0.0 };
            next[i] = shifted - prev[i];
        }
        for (o, &v) in out.iter_mut().zip(&next) {
            *o += c * v;
        }
        prev = cur;
        cur = next;
    }
    out
}

/// Coefficients of `q(x) = p(a x + b)` given the coefficients of `p`.
fn compose_affine(p: &[f64], a: f64, b: f64) -> Vec<f64> {
    let n = p.len();
    let mut q = vec![0.0; n];
    for &c in p.iter().rev() {
        let mut next = vec![0.0; n];
        for i in 0..n {
            next[i] += q[i] * b;
            if i + 1 < n {
                next[i + 1] += q[i] * a;
            }
        }
        next[0] += c;
        q = next;
    }
    q
}

/// Householder QR least squares for a column-major `n x m` matrix, `n >= m`.
///
/// Overwrites `cols` and `rhs`. Fails if the matrix is numerically rank deficient.
fn least_squares(cols: &mut [Vec<f64>], rhs: &mut [f64]) -> Result<Vec<f64>> {
    let m = cols.len();
    let n = rhs.len();
    debug_assert!(n >= m);

    let mut diag_max = 0.0_f64;
    for k in 0..m {
        let norm = cols[k][k..].iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Err(Error::InsufficientData(format!(
                "least-squares system is rank deficient at column {k}"
            )));
        }
        let alpha = if cols[k][k] > 0.0 { -norm } else { norm };

        let mut v = cols[k][k..].to_vec();
        v[0] -= alpha;
        let v_norm2: f64 = v.iter().map(|x| x * x).sum();

        if v_norm2 > 0.0 {
            for col in cols[k..].iter_mut() {
                reflect(&v, v_norm2, &mut col[k..]);
            }
            reflect(&v, v_norm2, &mut rhs[k..]);
        }

        diag_max = diag_max.max(alpha.abs());
        if alpha.abs() <= n as f64 * f64::EPSILON * diag_max {
            return Err(Error::InsufficientData(format!(
                "least-squares system is rank deficient at column {k}"
            )));
        }
    }

    let mut x = vec![0.0; m];
    for k in (0..m).rev() {
        let mut s = rhs[k];
        for j in k + 1..m {
            s -= cols[j][k] * x[j];
        }
        x[k] = s / cols[k][k];
    }
    Ok(x)
}

#[inline]
fn reflect(v: &[f64], v_norm2: f64, target: &mut [f64]) {
    let dot: f64 = v.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    let f = 2.0 * dot / v_norm2;
    for (t, &vi) in target.iter_mut().zip(v) {
        *t -= f * vi;
    }
}

fn distinct_count(xs: impl Iterator<Item = f64>) -> usize {
    let mut v: Vec<f64> = xs.collect();
    v.sort_by(f64::total_cmp);
    v.dedup();
    v.len()
}

/// Design-time sample points concentrated near the middle of `domain`.
///
/// 600 points from `N(mid, (0.05 h)^2)`, 300 from `N(mid, (0.3 h)^2)` and 100
/// evenly spaced points, where `h` is the domain half-width. Points are clipped to
/// the domain and sorted. Deterministic for a given seed.
pub fn operating_range_samples(domain: [f64; 2], seed: u64) -> Result<Vec<f64>> {
    let [lo, hi] = domain;
    if !(lo.is_finite() && hi.is_finite() && lo < hi) {
        return Err(Error::InvalidConfig(format!(
            "sampling domain must be finite with lo < hi, got [{lo}, {hi}]"
        )));
    }
    let mid = 0.5 * (lo + hi);
    let half = 0.5 * (hi - lo);

    let narrow = Normal::new(mid, 0.05 * half)
        .map_err(|e| Error::InvalidConfig(format!("invalid sampling distribution: {e}")))?;
    let wide = Normal::new(mid, 0.3 * half)
        .map_err(|e| Error::InvalidConfig(format!("invalid sampling distribution: {e}")))?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut xs = Vec::with_capacity(1000);
    xs.extend((0..600).map(|_| narrow.sample(&mut rng)));
    xs.extend((0..300).map(|_| wide.sample(&mut rng)));
    xs.extend(linspace(lo, hi, 100));

    for x in xs.iter_mut() {
        *x = x.clamp(lo, hi);
    }
    xs.sort_by(f64::total_cmp);
    Ok(xs)
}

/// `n` evenly spaced points from `lo` to `hi` inclusive.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { hi } else { lo + step * i as f64 })
                .collect()
        }
    }
}

/// Mean of `|p(x) - f(x)|` over `xs`.
pub fn mean_abs_error(p: &PolynomialCoefficients, f: impl Fn(f64) -> f64, xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().map(|&x| (p.eval(x) - f(x)).abs()).sum::<f64>() / xs.len() as f64
}
