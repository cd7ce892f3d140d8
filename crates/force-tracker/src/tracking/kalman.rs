//! Kalman filter for force position tracking.
//!
//! Implements a constant-velocity model in 2-D space.
//! State: [x, y, vx, vy] (measurement units, units per second)
//! Observation: [x, y] (a single GPS fix)
//!
//! The model is unit-agnostic. The force service feeds latitude as `x` and
//! longitude as `y`, so `vx` is the northward rate in degrees per second.

use crate::{config::FilterConfig, Result, TrackingError};

/// 4×4 matrix type (row-major)
type Mat4 = [[f64; 4]; 4];
/// 2×2 matrix type (row-major)
type Mat2 = [[f64; 2]; 2];
/// 4×2 matrix type (row-major)
type Mat4x2 = [[f64; 2]; 4];
/// 2-vector
type Vec2 = [f64; 2];

/// Snapshot of the state vector `[x, y, vx, vy]`.
pub type StateVector = [f64; 4];

/// What a measurement update actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionOutcome {
    /// Regular update through S⁻¹.
    Applied,
    /// S was numerically singular; the identity was used in place of S⁻¹.
    ///
    /// Repeated fallbacks point at degenerate or duplicated measurements.
    SingularFallback,
}

/// Constant-velocity Kalman filter for a single tracked force.
///
/// The state vector encodes position and velocity in 2-D:
///   x = [x, y, vx, vy]
///
/// State and covariance are private; [`predict_to`](Self::predict_to),
/// [`correct`](Self::correct) and [`update`](Self::update) are the only ways
/// to change them, which keeps P symmetric with a non-negative diagonal.
#[derive(Debug, Clone)]
pub struct StateEstimator {
    /// State estimate [x, y, vx, vy]
    x: StateVector,
    /// State covariance (4×4, symmetric positive-semi-definite)
    p: Mat4,
    /// Process noise (diagonal, constant)
    q: Mat4,
    /// Measurement noise (diagonal, constant)
    r: Mat2,
    /// |det(S)| threshold for the singular fallback
    singular_threshold: f64,
}

impl StateEstimator {
    /// Create a filter at the origin with zero velocity and P₀ from `config`.
    pub fn new(config: &FilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config([0.0; 4], config))
    }

    /// Create a filter whose position is set directly to a first fix.
    ///
    /// No correction is run: the first report becomes the position estimate
    /// as-is, velocity starts at zero and P keeps its full initial value.
    pub fn at_position(x: f64, y: f64, config: &FilterConfig) -> Result<Self> {
        config.validate()?;
        check_finite("x", x)?;
        check_finite("y", y)?;
        Ok(Self::from_config([x, y, 0.0, 0.0], config))
    }

    /// Create a filter at the origin with the default noise settings.
    pub fn with_defaults() -> Self {
        Self::from_config([0.0; 4], &FilterConfig::default())
    }

    /// Build without validation; callers must have validated `config` and `x`.
    pub(crate) fn from_config(x: StateVector, config: &FilterConfig) -> Self {
        Self {
            x,
            p: mat4_diag(config.initial_variance),
            q: mat4_diag(config.process_noise),
            r: [
                [config.measurement_noise[0], 0.0],
                [0.0, config.measurement_noise[1]],
            ],
            singular_threshold: config.singular_threshold,
        }
    }

    /// Predict forward by `dt` seconds using the constant-velocity model.
    ///
    /// State transition (applied to x):
    ///   x += dt * vx,  y += dt * vy
    ///
    /// Covariance update:
    ///   P ← F · P · Fᵀ + Q
    ///
    /// `dt` must be finite and non-negative; anything else is rejected
    /// before the state is touched.
    pub fn predict_to(&mut self, dt: f64) -> Result<()> {
        check_dt(dt)?;
        self.predict_unchecked(dt);
        Ok(())
    }

    fn predict_unchecked(&mut self, dt: f64) {
        // --- state propagation: x ← F · x ---
        self.x[0] += dt * self.x[2];
        self.x[1] += dt * self.x[3];

        let mut f = mat4_identity();
        f[0][2] = dt;
        f[1][3] = dt;

        // --- covariance prediction: P ← F · P · Fᵀ + Q ---
        let fp = mat4_mul(&f, &self.p);
        let fpft = mat4_mul(&fp, &mat4_transpose(&f));
        self.p = mat4_add(&fpft, &self.q);
        self.condition_covariance();
    }

    /// Update the filter with a 2-D position observation.
    ///
    /// Observation model: H = [I₂ | 0₂]  (only position is observed)
    ///
    /// Innovation:    y = z − H·x
    /// Innovation cov: S = H·P·Hᵀ + R   (2×2)
    /// Kalman gain:   K = P·Hᵀ · S⁻¹   (4×2)
    /// State update:  x ← x + K·y
    /// Cov update:    P ← (I₄ − K·H)·P
    ///
    /// When |det(S)| is below the configured threshold the identity is used
    /// for S⁻¹ and [`CorrectionOutcome::SingularFallback`] is returned.
    pub fn correct(&mut self, measurement: Vec2) -> Result<CorrectionOutcome> {
        check_finite("measurement x", measurement[0])?;
        check_finite("measurement y", measurement[1])?;
        Ok(self.correct_unchecked(measurement))
    }

    fn correct_unchecked(&mut self, z: Vec2) -> CorrectionOutcome {
        // Innovation: y = z - H·x
        let y = [z[0] - self.x[0], z[1] - self.x[1]];

        // H·P·Hᵀ = top-left 2×2 of P
        let mut s = mat2_from_top_left(&self.p);
        for i in 0..2 {
            for j in 0..2 {
                s[i][j] += self.r[i][j];
            }
        }

        let (s_inv, outcome) = match mat2_inv(&s, self.singular_threshold) {
            Some(inv) => (inv, CorrectionOutcome::Applied),
            None => (mat2_identity(), CorrectionOutcome::SingularFallback),
        };

        // K = P·Hᵀ · S⁻¹, where P·Hᵀ is the first two columns of P
        let k = mat4x2_mul_mat2(&mat4x2_from_cols(&self.p), &s_inv);

        let ky = mat4x2_mul_vec2(&k, y);
        for i in 0..4 {
            self.x[i] += ky[i];
        }

        // K·H keeps K in its first two columns and zeros elsewhere
        let mut kh = [[0.0f64; 4]; 4];
        for i in 0..4 {
            kh[i][0] = k[i][0];
            kh[i][1] = k[i][1];
        }
        let i_minus_kh = mat4_sub(&mat4_identity(), &kh);
        self.p = mat4_mul(&i_minus_kh, &self.p);
        self.condition_covariance();

        outcome
    }

    /// Predict by `dt` then correct with the fix `(x, y)`.
    ///
    /// This is the ingestion entry point. All inputs are validated up front,
    /// so a rejected call leaves the filter exactly as it was.
    pub fn update(&mut self, x: f64, y: f64, dt: f64) -> Result<CorrectionOutcome> {
        check_finite("x", x)?;
        check_finite("y", y)?;
        check_dt(dt)?;
        self.predict_unchecked(dt);
        Ok(self.correct_unchecked([x, y]))
    }

    /// Position extrapolated `horizon` seconds from the current estimate.
    ///
    /// Negative horizons look backwards. Does not touch the filter.
    pub fn forecast(&self, horizon: f64) -> Result<Vec2> {
        check_finite("horizon", horizon)?;
        let [x, y, vx, vy] = self.x;
        Ok([x + vx * horizon, y + vy * horizon])
    }

    /// Current state estimate [x, y, vx, vy].
    pub fn estimate(&self) -> StateVector {
        self.x
    }

    /// Current position estimate [x, y].
    pub fn position(&self) -> Vec2 {
        [self.x[0], self.x[1]]
    }

    /// Current velocity estimate [vx, vy].
    pub fn velocity(&self) -> Vec2 {
        [self.x[2], self.x[3]]
    }

    /// Variances of the position components, [σ²x, σ²y].
    pub fn position_variance(&self) -> Vec2 {
        [self.p[0][0], self.p[1][1]]
    }

    /// Copy of the full covariance matrix.
    pub fn covariance(&self) -> [[f64; 4]; 4] {
        self.p
    }

    /// Restore exact symmetry and clamp round-off below zero on the diagonal.
    fn condition_covariance(&mut self) {
        for i in 0..4 {
            for j in (i + 1)..4 {
                let avg = 0.5 * (self.p[i][j] + self.p[j][i]);
                self.p[i][j] = avg;
                self.p[j][i] = avg;
            }
            if self.p[i][i] < 0.0 {
                self.p[i][i] = 0.0;
            }
        }
    }
}

impl Default for StateEstimator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn check_finite(what: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(TrackingError::InvalidInput(format!(
            "{what} must be finite, got {value}"
        )))
    }
}

fn check_dt(dt: f64) -> Result<()> {
    if dt.is_finite() && dt >= 0.0 {
        Ok(())
    } else {
        Err(TrackingError::InvalidInput(format!(
            "dt must be finite and non-negative, got {dt}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Private math helpers
// ---------------------------------------------------------------------------

/// 4×4 matrix multiply: C = A · B.
fn mat4_mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut c = [[0.0f64; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            for k in 0..4 {
                c[i][j] += a[i][k] * b[k][j];
            }
        }
    }
    c
}

/// 4×4 matrix element-wise add.
fn mat4_add(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut c = [[0.0f64; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            c[i][j] = a[i][j] + b[i][j];
        }
    }
    c
}

/// 4×4 matrix element-wise subtract: A − B.
fn mat4_sub(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut c = [[0.0f64; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            c[i][j] = a[i][j] - b[i][j];
        }
    }
    c
}

fn mat4_identity() -> Mat4 {
    mat4_diag([1.0; 4])
}

fn mat4_diag(d: [f64; 4]) -> Mat4 {
    let mut m = [[0.0f64; 4]; 4];
    for i in 0..4 {
        m[i][i] = d[i];
    }
    m
}

/// Transpose of a 4×4 matrix.
fn mat4_transpose(a: &Mat4) -> Mat4 {
    let mut t = [[0.0f64; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            t[j][i] = a[i][j];
        }
    }
    t
}

fn mat2_identity() -> Mat2 {
    [[1.0, 0.0], [0.0, 1.0]]
}

/// Analytical inverse of a 2×2 matrix.
///
/// Returns `None` if |det| < `threshold` (singular or near-singular).
fn mat2_inv(m: &Mat2, threshold: f64) -> Option<Mat2> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if !det.is_finite() || det.abs() < threshold || det == 0.0 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [m[1][1] * inv_det, -m[0][1] * inv_det],
        [-m[1][0] * inv_det, m[0][0] * inv_det],
    ])
}

/// Top-left 2×2 sub-matrix of a 4×4 matrix.
///
/// Because H = [I₂ | 0₂], H·P·Hᵀ equals the top-left 2×2 of P.
fn mat2_from_top_left(p: &Mat4) -> Mat2 {
    [[p[0][0], p[0][1]], [p[1][0], p[1][1]]]
}

/// First 2 columns of a 4×4 matrix as a 4×2 matrix (P·Hᵀ).
fn mat4x2_from_cols(p: &Mat4) -> Mat4x2 {
    let mut out = [[0.0f64; 2]; 4];
    for i in 0..4 {
        out[i] = [p[i][0], p[i][1]];
    }
    out
}

/// Multiply a 4×2 matrix by a 2×2 matrix, yielding a 4×2 matrix.
fn mat4x2_mul_mat2(a: &Mat4x2, b: &Mat2) -> Mat4x2 {
    let mut out = [[0.0f64; 2]; 4];
    for i in 0..4 {
        for j in 0..2 {
            out[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j];
        }
    }
    out
}

/// Multiply a 4×2 matrix by a 2-vector, yielding a 4-vector.
fn mat4x2_mul_vec2(m: &Mat4x2, v: Vec2) -> [f64; 4] {
    let mut out = [0.0f64; 4];
    for i in 0..4 {
        out[i] = m[i][0] * v[0] + m[i][1] * v[1];
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn assert_all_finite(est: &StateEstimator) {
        assert!(est.estimate().iter().all(|v| v.is_finite()), "state: {:?}", est.estimate());
        for row in est.covariance() {
            assert!(row.iter().all(|v| v.is_finite()), "covariance row: {:?}", row);
        }
    }

    fn assert_symmetric_nonneg(est: &StateEstimator) {
        let p = est.covariance();
        for i in 0..4 {
            assert!(p[i][i] >= 0.0, "P[{i}][{i}] = {}", p[i][i]);
            for j in 0..4 {
                assert_eq!(p[i][j], p[j][i], "P not symmetric at ({i}, {j})");
            }
        }
    }

    #[test]
    fn test_first_fix_is_assigned_directly() {
        let est = StateEstimator::at_position(32.0, 34.8, &FilterConfig::default()).unwrap();
        assert_eq!(est.estimate(), [32.0, 34.8, 0.0, 0.0]);
        assert_eq!(est.position_variance(), [1000.0, 1000.0]);
    }

    #[test]
    fn test_new_starts_at_origin() {
        let est = StateEstimator::new(&FilterConfig::default()).unwrap();
        assert_eq!(est.estimate(), [0.0; 4]);
        assert_eq!(est.covariance(), StateEstimator::default().covariance());

        let bad = FilterConfig {
            measurement_noise: [f64::NAN, 1.0],
            ..FilterConfig::default()
        };
        assert!(matches!(StateEstimator::new(&bad), Err(TrackingError::Config(_))));
    }

    #[test]
    fn test_predict_stationary() {
        let mut est = StateEstimator::at_position(1.0, 2.0, &FilterConfig::default()).unwrap();
        est.predict_to(5.0).unwrap();

        assert_eq!(est.position(), [1.0, 2.0]);
        // P_xx = 1000 + dt²·1000 + 0.1
        assert_abs_diff_eq!(est.position_variance()[0], 26_000.1, epsilon = 1e-9);
        assert_abs_diff_eq!(est.covariance()[0][2], 5_000.0, epsilon = 1e-9);
        assert_symmetric_nonneg(&est);
    }

    #[test]
    fn test_predict_moves_with_velocity() {
        let mut est = StateEstimator::at_position(0.0, 0.0, &FilterConfig::default()).unwrap();
        // Build up a velocity of roughly +1/s along x.
        for t in 1..=20 {
            est.update(t as f64, 0.0, 1.0).unwrap();
        }
        let [vx, _] = est.velocity();
        assert!((vx - 1.0).abs() < 0.2, "vx should be near 1.0, got {vx}");

        let before = est.position();
        est.predict_to(2.0).unwrap();
        assert_abs_diff_eq!(est.position()[0], before[0] + 2.0 * vx, epsilon = 1e-12);
    }

    #[test]
    fn test_negative_and_nan_dt_rejected() {
        let mut est = StateEstimator::at_position(1.0, 1.0, &FilterConfig::default()).unwrap();
        let snapshot = (est.estimate(), est.covariance());

        assert!(matches!(est.predict_to(-0.5), Err(TrackingError::InvalidInput(_))));
        assert!(est.predict_to(f64::NAN).is_err());
        assert!(est.update(1.0, 1.0, -1.0).is_err());
        assert!(est.update(1.0, 1.0, f64::INFINITY).is_err());

        assert_eq!((est.estimate(), est.covariance()), snapshot);
    }

    #[test]
    fn test_non_finite_measurement_leaves_state() {
        let mut est = StateEstimator::at_position(1.0, 1.0, &FilterConfig::default()).unwrap();
        est.update(1.1, 0.9, 1.0).unwrap();
        let snapshot = (est.estimate(), est.covariance());

        assert!(est.update(f64::NAN, 1.0, 1.0).is_err());
        assert!(est.update(1.0, f64::NEG_INFINITY, 1.0).is_err());
        assert!(est.correct([f64::INFINITY, 0.0]).is_err());

        assert_eq!((est.estimate(), est.covariance()), snapshot);
    }

    #[test]
    fn test_at_position_rejects_nan() {
        assert!(StateEstimator::at_position(f64::NAN, 0.0, &FilterConfig::default()).is_err());
    }

    #[test]
    fn test_correction_blends_between_prior_and_measurement() {
        // Concrete scenario: ~100 m north after 10 s.
        let mut est = StateEstimator::at_position(32.000, 34.800, &FilterConfig::default()).unwrap();
        let outcome = est.update(32.0009, 34.800, 10.0).unwrap();
        assert_eq!(outcome, CorrectionOutcome::Applied);

        let [lat, lon, v_lat, v_lon] = est.estimate();
        assert!(lat > 32.000 && lat < 32.0009, "lat {lat} must lie strictly between fixes");
        assert_eq!(lon, 34.800);
        assert!(v_lat > 0.0, "northward velocity must be positive, got {v_lat}");
        assert_eq!(v_lon, 0.0);
    }

    #[test]
    fn test_forecast_does_not_mutate() {
        let mut a = StateEstimator::at_position(0.0, 0.0, &FilterConfig::default()).unwrap();
        let mut b = a.clone();
        a.update(1.0, 0.5, 1.0).unwrap();
        b.update(1.0, 0.5, 1.0).unwrap();

        for h in [-10.0, 0.0, 3.5, 60.0] {
            a.forecast(h).unwrap();
        }

        a.update(2.0, 1.0, 1.0).unwrap();
        b.update(2.0, 1.0, 1.0).unwrap();
        assert_eq!(a.estimate(), b.estimate());
        assert_eq!(a.covariance(), b.covariance());
    }

    #[test]
    fn test_forecast_linear_extrapolation() {
        let mut est = StateEstimator::at_position(0.0, 0.0, &FilterConfig::default()).unwrap();
        for t in 1..=10 {
            est.update(0.0, -(t as f64), 1.0).unwrap();
        }
        let [x, y, vx, vy] = est.estimate();

        let ahead = est.forecast(30.0).unwrap();
        assert_abs_diff_eq!(ahead[0], x + 30.0 * vx, epsilon = 1e-12);
        assert_abs_diff_eq!(ahead[1], y + 30.0 * vy, epsilon = 1e-12);

        let behind = est.forecast(-5.0).unwrap();
        assert_abs_diff_eq!(behind[1], y - 5.0 * vy, epsilon = 1e-12);

        assert!(est.forecast(f64::NAN).is_err());
    }

    #[test]
    fn test_singular_innovation_falls_back_to_identity() {
        // R = 0 and a zero position block in P make S = 0.
        let config = FilterConfig {
            initial_variance: [0.0, 0.0, 1.0, 1.0],
            process_noise: [0.0; 4],
            measurement_noise: [0.0, 0.0],
            ..FilterConfig::default()
        };
        let mut est = StateEstimator::at_position(1.0, 2.0, &config).unwrap();

        let outcome = est.update(5.0, -3.0, 0.0).unwrap();
        assert_eq!(outcome, CorrectionOutcome::SingularFallback);
        assert_all_finite(&est);
        assert_symmetric_nonneg(&est);
        // With P·Hᵀ = 0 the fallback gain is zero: nothing moves.
        assert_eq!(est.estimate(), [1.0, 2.0, 0.0, 0.0]);

        // Repeated degenerate corrections stay finite too.
        for _ in 0..10 {
            est.correct([5.0, -3.0]).unwrap();
        }
        assert_all_finite(&est);
    }

    #[test]
    fn test_near_singular_determinant_uses_fallback() {
        let config = FilterConfig {
            initial_variance: [1e-6, 1e-6, 0.0, 0.0],
            process_noise: [0.0; 4],
            measurement_noise: [0.0, 0.0],
            ..FilterConfig::default()
        };
        let mut est = StateEstimator::at_position(0.0, 0.0, &config).unwrap();
        // det(S) = 1e-12 < 1e-10
        assert_eq!(est.correct([1.0, 1.0]).unwrap(), CorrectionOutcome::SingularFallback);
        assert_all_finite(&est);
        assert!(est.position()[0].abs() < 1e-5);
    }

    #[test]
    fn test_convergence_on_stationary_target() {
        let truth = [5.0, -3.0];
        let noise = Normal::new(0.0, 0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut est = StateEstimator::at_position(truth[0], truth[1], &FilterConfig::default())
            .unwrap();

        let mut variances = Vec::new();
        let mut late_velocity = [0.0f64; 2];
        let steps = 400;
        for step in 0..steps {
            let z = [truth[0] + noise.sample(&mut rng), truth[1] + noise.sample(&mut rng)];
            est.update(z[0], z[1], 1.0).unwrap();
            variances.push(est.position_variance()[0]);
            if step >= steps - 200 {
                let v = est.velocity();
                late_velocity[0] += v[0] / 200.0;
                late_velocity[1] += v[1] / 200.0;
            }
            assert_symmetric_nonneg(&est);
        }

        for pair in variances.windows(2) {
            assert!(
                pair[1] <= pair[0] + 1e-9,
                "position variance increased: {} -> {}",
                pair[0],
                pair[1]
            );
        }
        // Steady-state floor is well below the initial uncertainty.
        let floor = *variances.last().unwrap();
        assert!(floor > 0.0 && floor < 10.0, "steady-state variance {floor}");
        assert_abs_diff_eq!(variances[steps - 2], floor, epsilon = 1e-6);

        assert!(late_velocity[0].abs() < 0.05, "mean vx {}", late_velocity[0]);
        assert!(late_velocity[1].abs() < 0.05, "mean vy {}", late_velocity[1]);

        let pos = est.position();
        assert!((pos[0] - truth[0]).abs() < 1.0);
        assert!((pos[1] - truth[1]).abs() < 1.0);
    }

    #[test]
    fn test_zero_dt_update_is_pure_correction() {
        let mut est = StateEstimator::at_position(10.0, 10.0, &FilterConfig::default()).unwrap();
        est.update(10.5, 10.0, 0.0).unwrap();
        // No time elapsed: velocity gets no cross-covariance to learn from.
        assert_eq!(est.velocity(), [0.0, 0.0]);
        assert!(est.position()[0] > 10.0 && est.position()[0] < 10.5);
    }
}
