//! Principal component decomposition of 3D hit candidates.
//!
//! Every point has weight one. The scatter matrix is normalised by the
//! number of points and decomposed with the symmetric eigensolver; the
//! eigen pairs are returned sorted by descending eigenvalue.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use pixroi_core::{Hit3d, PcaError, PrincipalComponents};

/// Iteration cap of the symmetric eigensolver.
const MAX_EIGEN_ITERATIONS: usize = 1000;

/// Computes the principal components of a set of hits.
///
/// The mean DOCA of the result is zero; callers fill it in once they know
/// which points it should be averaged over.
///
/// # Errors
/// Returns [`PcaError::NoPoints`] for an empty set, [`PcaError::NonFinite`]
/// if a coordinate is not finite, and [`PcaError::NotConverged`] if the
/// eigensolver fails.
pub fn principal_components<'a, I>(hits: I) -> Result<PrincipalComponents, PcaError>
where
    I: IntoIterator<Item = &'a Hit3d>,
{
    let points: Vec<Vector3<f64>> = hits
        .into_iter()
        .map(|hit| Vector3::new(hit.x, hit.y, hit.z))
        .collect();
    if points.is_empty() {
        return Err(PcaError::NoPoints);
    }

    let n = points.len() as f64;
    let mean = points.iter().sum::<Vector3<f64>>() / n;
    let mut scatter = Matrix3::<f64>::zeros();
    for point in &points {
        let centered = point - mean;
        scatter += centered * centered.transpose();
    }
    let covariance = scatter / n;
    if !covariance.iter().all(|v| v.is_finite()) {
        return Err(PcaError::NonFinite);
    }

    let eigen = SymmetricEigen::try_new(covariance, f64::EPSILON, MAX_EIGEN_ITERATIONS)
        .ok_or(PcaError::NotConverged)?;

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut eigenvalues = [0.0; 3];
    let mut eigenvectors = [[0.0; 3]; 3];
    for (rank, &index) in order.iter().enumerate() {
        eigenvalues[rank] = eigen.eigenvalues[index];
        let column = eigen.eigenvectors.column(index).normalize();
        eigenvectors[rank] = [column[0], column[1], column[2]];
    }

    Ok(PrincipalComponents {
        n_points: points.len(),
        mean_position: [mean[0], mean[1], mean[2]],
        eigenvalues,
        eigenvectors,
        mean_doca: 0.0,
    })
}

/// Mean DOCA of `hits` to the principal axis of `components`.
///
/// Returns zero for an empty set.
pub fn mean_doca<'a, I>(components: &PrincipalComponents, hits: I) -> f64
where
    I: IntoIterator<Item = &'a Hit3d>,
{
    let (sum, count) = hits
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), hit| {
            (sum + components.doca(hit.position()), count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn hit(x: f64, y: f64, z: f64) -> Hit3d {
        Hit3d::new(x, y, z, 1.0, 0, 0)
    }

    #[test]
    fn test_collinear_points() {
        let hits: Vec<_> = (0..5).map(|i| hit(1.0, 2.0 * f64::from(i), 3.0)).collect();
        let pcs = principal_components(&hits).unwrap();

        assert_eq!(pcs.n_points, 5);
        assert_relative_eq!(pcs.mean_position[1], 4.0);
        assert_relative_eq!(pcs.eigenvalues[0], 8.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pcs.eigenvalues[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(pcs.axis()[1].abs(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(mean_doca(&pcs, &hits), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_offset_point_eigenvalues() {
        let hits = vec![
            hit(0.0, 0.0, 0.0),
            hit(0.0, 0.0, 100.0),
            hit(0.0, 0.0, 200.0),
            hit(50.0, 0.0, 100.0),
        ];
        let pcs = principal_components(&hits).unwrap();

        // The x and z spreads are uncorrelated: var_z = 5000, var_x = 468.75.
        assert_relative_eq!(pcs.eigenvalues[0], 5000.0, epsilon = 1e-6);
        assert_relative_eq!(pcs.eigenvalues[1], 468.75, epsilon = 1e-6);
        assert_abs_diff_eq!(pcs.eigenvalues[2], 0.0, epsilon = 1e-6);
        assert_relative_eq!(pcs.axis()[2].abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(pcs.mean_position[0], 12.5);

        let doca = pcs.doca([50.0, 0.0, 100.0]);
        assert_relative_eq!(doca, 37.5, epsilon = 1e-9);
    }

    #[test]
    fn test_eigenvalues_sorted_descending() {
        let hits = vec![
            hit(0.0, 0.0, 0.0),
            hit(10.0, 1.0, 0.5),
            hit(20.0, -1.0, 0.0),
            hit(30.0, 0.0, -0.5),
        ];
        let pcs = principal_components(&hits).unwrap();
        assert!(pcs.eigenvalues[0] >= pcs.eigenvalues[1]);
        assert!(pcs.eigenvalues[1] >= pcs.eigenvalues[2]);
        for vector in pcs.eigenvectors {
            let norm: f64 = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_single_point() {
        let pcs = principal_components(&[hit(1.0, 2.0, 3.0)]).unwrap();
        assert_eq!(pcs.mean_position, [1.0, 2.0, 3.0]);
        assert_eq!(pcs.eigenvalues, [0.0; 3]);
    }

    #[test]
    fn test_errors() {
        let empty: Vec<Hit3d> = Vec::new();
        assert_eq!(principal_components(&empty), Err(PcaError::NoPoints));
        assert_eq!(
            principal_components(&[hit(f64::NAN, 0.0, 0.0)]),
            Err(PcaError::NonFinite)
        );
    }
}
