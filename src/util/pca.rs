use ndarray::Array2;

const MAX_SWEEPS: usize = 50;
const OFF_DIAGONAL_TOLERANCE: f64 = 1e-12;

/// Principal axes of a centered data matrix.
///
/// Returns a `(columns × dim)` matrix whose columns are the `dim` leading
/// eigenvectors of the population covariance matrix, ordered by descending
/// eigenvalue. The covariance matrix is symmetric, so the eigendecomposition
/// runs as cyclic Jacobi rotations, which are fully deterministic.
///
/// Eigenvectors are only unique up to a sign flip; each returned column is
/// oriented so its largest-magnitude loading is positive, keeping projected
/// coordinates stable across runs.
pub(crate) fn principal_components(x: &Array2<f64>, dim: usize) -> Array2<f64> {
    let d = x.ncols();
    let dim = dim.min(d);
    #[allow(clippy::cast_precision_loss)]
    let n = x.nrows().max(1) as f64;

    // Population covariance; the input is already centered per column.
    let covariance = x.t().dot(x) / n;
    let (eigenvalues, eigenvectors) = symmetric_eigen(covariance);

    // Rank columns by descending eigenvalue (stable on ties)
    let mut order: Vec<usize> = (0..d).collect();
    order.sort_by(|&a, &b| {
        eigenvalues[b]
            .partial_cmp(&eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut components = Array2::<f64>::zeros((d, dim));
    for (target, &source) in order.iter().take(dim).enumerate() {
        for row in 0..d {
            components[[row, target]] = eigenvectors[[row, source]];
        }
        orient_component(&mut components, target, d);
    }

    components
}

/// Flip the component so its largest-magnitude loading is positive.
fn orient_component(components: &mut Array2<f64>, column: usize, rows: usize) {
    let mut leading = 0;
    for row in 1..rows {
        if components[[row, column]].abs() > components[[leading, column]].abs() {
            leading = row;
        }
    }
    if components[[leading, column]] < 0.0 {
        for row in 0..rows {
            components[[row, column]] = -components[[row, column]];
        }
    }
}

/// Cyclic Jacobi eigendecomposition of a symmetric matrix.
///
/// Returns `(eigenvalues, eigenvectors)` with eigenvector `j` in column `j`.
fn symmetric_eigen(mut a: Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let d = a.nrows();
    let mut v = Array2::<f64>::eye(d);

    for _ in 0..MAX_SWEEPS {
        if off_diagonal_norm_sq(&a) < OFF_DIAGONAL_TOLERANCE {
            break;
        }

        for p in 0..d {
            for q in (p + 1)..d {
                let apq = a[[p, q]];
                if apq.abs() < OFF_DIAGONAL_TOLERANCE {
                    continue;
                }

                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + theta.mul_add(theta, 1.0).sqrt());
                let c = 1.0 / t.mul_add(t, 1.0).sqrt();
                let s = t * c;

                // A <- Jᵀ A J, rotating columns then rows in the (p, q) plane
                for i in 0..d {
                    let aip = a[[i, p]];
                    let aiq = a[[i, q]];
                    a[[i, p]] = c.mul_add(aip, -s * aiq);
                    a[[i, q]] = s.mul_add(aip, c * aiq);
                }
                for i in 0..d {
                    let api = a[[p, i]];
                    let aqi = a[[q, i]];
                    a[[p, i]] = c.mul_add(api, -s * aqi);
                    a[[q, i]] = s.mul_add(api, c * aqi);
                }

                // V <- V J accumulates the eigenvectors
                for i in 0..d {
                    let vip = v[[i, p]];
                    let viq = v[[i, q]];
                    v[[i, p]] = c.mul_add(vip, -s * viq);
                    v[[i, q]] = s.mul_add(vip, c * viq);
                }
            }
        }
    }

    let eigenvalues = (0..d).map(|i| a[[i, i]]).collect();
    (eigenvalues, v)
}

fn off_diagonal_norm_sq(a: &Array2<f64>) -> f64 {
    let d = a.nrows();
    let mut sum = 0.0;
    for p in 0..d {
        for q in (p + 1)..d {
            sum += a[[p, q]] * a[[p, q]];
        }
    }
    sum
}
