use nalgebra::{Matrix3, SMatrix, SVector, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::EstimationFailure;

pub type Point = [f64; 2];

/// A source point and the destination it should map to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointPair {
    pub source: Point,
    pub destination: Point,
}

impl PointPair {
    pub fn new(source: Point, destination: Point) -> Self {
        Self {
            source,
            destination,
        }
    }
}

/// A geometric model RANSAC can hypothesise from a minimal sample.
pub trait RansacModel: Sized {
    const NAME: &'static str;
    const SAMPLE_SIZE: usize;

    /// Fit to the given pairs, minimal or overdetermined. `None` when the
    /// pairs are degenerate for this model.
    fn fit(pairs: &[PointPair]) -> Option<Self>;

    /// Reprojection distance of `pair` under the model, in pixels.
    fn residual(&self, pair: &PointPair) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RansacParams {
    pub max_iterations: usize,
    pub threshold: f64,
    pub confidence: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct RansacFit<M> {
    pub model: M,
    pub inliers: Vec<bool>,
    pub inlier_count: usize,
    pub iterations: usize,
}

/// Iterations needed to draw one all-inlier sample with probability
/// `confidence`, given the current inlier ratio.
pub fn required_iterations(
    inlier_ratio: f64,
    sample_size: usize,
    confidence: f64,
    max_iterations: usize,
) -> usize {
    let good_sample = inlier_ratio.powi(sample_size as i32);
    if good_sample >= 1.0 {
        return 1;
    }
    if good_sample <= f64::EPSILON {
        return max_iterations;
    }

    let needed = (1.0 - confidence).ln() / (1.0 - good_sample).ln();
    if needed.is_finite() && needed >= 0.0 {
        (needed.ceil() as usize).clamp(1, max_iterations)
    } else {
        max_iterations
    }
}

fn score<M: RansacModel>(model: &M, pairs: &[PointPair], threshold: f64) -> (Vec<bool>, usize) {
    let inliers: Vec<bool> = pairs
        .iter()
        .map(|pair| model.residual(pair) <= threshold)
        .collect();
    let count = inliers.iter().filter(|&&inlier| inlier).count();
    (inliers, count)
}

/// Seeded RANSAC followed by a least-squares refit on the consensus set.
///
/// The generator is created from `params.seed` on every call, so the same
/// input always yields the same model.
pub fn ransac<M: RansacModel>(
    pairs: &[PointPair],
    params: &RansacParams,
) -> Result<RansacFit<M>, EstimationFailure> {
    if pairs.len() < M::SAMPLE_SIZE {
        return Err(EstimationFailure::TooFewCorrespondences {
            stage: M::NAME,
            found: pairs.len(),
            required: M::SAMPLE_SIZE,
        });
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(M, Vec<bool>, usize)> = None;
    let mut budget = if pairs.len() == M::SAMPLE_SIZE {
        1
    } else {
        params.max_iterations
    };
    let mut iteration = 0;
    let mut sample = Vec::with_capacity(M::SAMPLE_SIZE);

    while iteration < budget {
        iteration += 1;

        sample.clear();
        sample.extend(
            rand::seq::index::sample(&mut rng, pairs.len(), M::SAMPLE_SIZE)
                .into_iter()
                .map(|i| pairs[i]),
        );

        let Some(model) = M::fit(&sample) else {
            continue;
        };
        let (inliers, count) = score(&model, pairs, params.threshold);
        let improves = best.as_ref().map_or(true, |(_, _, best_count)| count > *best_count);
        if improves && count >= M::SAMPLE_SIZE {
            budget = budget.min(required_iterations(
                count as f64 / pairs.len() as f64,
                M::SAMPLE_SIZE,
                params.confidence,
                params.max_iterations,
            ));
            best = Some((model, inliers, count));
        }
    }

    let (model, inliers, count) =
        best.ok_or(EstimationFailure::DegenerateGeometry { stage: M::NAME })?;

    let consensus: Vec<PointPair> = pairs
        .iter()
        .zip(inliers.iter())
        .filter(|(_, &inlier)| inlier)
        .map(|(pair, _)| *pair)
        .collect();

    // Keep the refit only if it does not lose support.
    let (model, inliers, inlier_count) = match M::fit(&consensus) {
        Some(refit) => {
            let (refit_inliers, refit_count) = score(&refit, pairs, params.threshold);
            if refit_count >= count {
                (refit, refit_inliers, refit_count)
            } else {
                (model, inliers, count)
            }
        }
        None => (model, inliers, count),
    };

    tracing::trace!(
        model = M::NAME,
        iterations = iteration,
        inliers = inlier_count,
        total = pairs.len(),
        "RANSAC converged"
    );

    Ok(RansacFit {
        model,
        inliers,
        inlier_count,
        iterations: iteration,
    })
}

fn collinear(a: Point, b: Point, c: Point) -> bool {
    let (ux, uy) = (b[0] - a[0], b[1] - a[1]);
    let (vx, vy) = (c[0] - a[0], c[1] - a[1]);
    let cross = ux * vy - uy * vx;
    let scale = (ux.hypot(uy) * vx.hypot(vy)).max(1.0);
    cross.abs() <= 1e-9 * scale
}

fn any_three_collinear(points: &[Point]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                if collinear(points[i], points[j], points[k]) {
                    return true;
                }
            }
        }
    }
    false
}

/// Similarity transform that moves the centroid to the origin and the mean
/// distance from it to sqrt(2).
fn hartley_normalization(points: &[Point]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_distance = points
        .iter()
        .map(|p| (p[0] - cx).hypot(p[1] - cy))
        .sum::<f64>()
        / n;
    if mean_distance <= f64::EPSILON {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_distance;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// Full projective transform, estimated with the normalized DLT.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    pub fn project(&self, point: Point) -> Option<Point> {
        let p = self.0 * Vector3::new(point[0], point[1], 1.0);
        if p.z.abs() <= f64::EPSILON {
            return None;
        }
        Some([p.x / p.z, p.y / p.z])
    }
}

impl RansacModel for Homography {
    const NAME: &'static str = "homography";
    const SAMPLE_SIZE: usize = 4;

    fn fit(pairs: &[PointPair]) -> Option<Self> {
        if pairs.len() < Self::SAMPLE_SIZE {
            return None;
        }

        let source: Vec<Point> = pairs.iter().map(|p| p.source).collect();
        let destination: Vec<Point> = pairs.iter().map(|p| p.destination).collect();
        if pairs.len() == Self::SAMPLE_SIZE
            && (any_three_collinear(&source) || any_three_collinear(&destination))
        {
            return None;
        }

        let t_source = hartley_normalization(&source)?;
        let t_destination = hartley_normalization(&destination)?;

        let mut ata = SMatrix::<f64, 9, 9>::zeros();
        for pair in pairs {
            let s = t_source * Vector3::new(pair.source[0], pair.source[1], 1.0);
            let d = t_destination * Vector3::new(pair.destination[0], pair.destination[1], 1.0);
            let (x, y) = (s.x, s.y);
            let (u, v) = (d.x, d.y);

            let row_u = SVector::<f64, 9>::from_row_slice(&[
                -x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u,
            ]);
            let row_v = SVector::<f64, 9>::from_row_slice(&[
                0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v,
            ]);
            ata += row_u * row_u.transpose();
            ata += row_v * row_v.transpose();
        }

        // The null vector of A is the eigenvector of A^T A with the smallest eigenvalue.
        let eigen = SymmetricEigen::new(ata);
        let (smallest, _) = eigen
            .eigenvalues
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))?;
        let h = eigen.eigenvectors.column(smallest);
        let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

        let matrix = t_destination.try_inverse()? * normalized * t_source;
        if matrix[(2, 2)].abs() <= 1e-12 {
            return None;
        }
        let matrix = matrix / matrix[(2, 2)];
        if !matrix.iter().all(|v| v.is_finite()) {
            return None;
        }

        Some(Homography(matrix))
    }

    fn residual(&self, pair: &PointPair) -> f64 {
        match self.project(pair.source) {
            Some(p) => (p[0] - pair.destination[0]).hypot(p[1] - pair.destination[1]),
            None => f64::INFINITY,
        }
    }
}

/// Rotation, uniform scale and translation: `[[a, -b, tx], [b, a, ty]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Similarity {
    pub fn matrix(&self) -> [[f64; 3]; 2] {
        [[self.a, -self.b, self.tx], [self.b, self.a, self.ty]]
    }

    pub fn apply(&self, point: Point) -> Point {
        [
            self.a * point[0] - self.b * point[1] + self.tx,
            self.b * point[0] + self.a * point[1] + self.ty,
        ]
    }
}

impl RansacModel for Similarity {
    const NAME: &'static str = "similarity";
    const SAMPLE_SIZE: usize = 2;

    /// Closed-form least squares over centred coordinates.
    fn fit(pairs: &[PointPair]) -> Option<Self> {
        if pairs.len() < Self::SAMPLE_SIZE {
            return None;
        }

        let n = pairs.len() as f64;
        let (mut sx, mut sy, mut dx, mut dy) = (0.0, 0.0, 0.0, 0.0);
        for pair in pairs {
            sx += pair.source[0];
            sy += pair.source[1];
            dx += pair.destination[0];
            dy += pair.destination[1];
        }
        let (sx, sy, dx, dy) = (sx / n, sy / n, dx / n, dy / n);

        let (mut dot, mut cross, mut norm) = (0.0, 0.0, 0.0);
        for pair in pairs {
            let (x, y) = (pair.source[0] - sx, pair.source[1] - sy);
            let (u, v) = (pair.destination[0] - dx, pair.destination[1] - dy);
            dot += x * u + y * v;
            cross += x * v - y * u;
            norm += x * x + y * y;
        }
        if norm <= 1e-12 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        if a.hypot(b) <= 1e-12 {
            return None;
        }

        Some(Similarity {
            a,
            b,
            tx: dx - (a * sx - b * sy),
            ty: dy - (b * sx + a * sy),
        })
    }

    fn residual(&self, pair: &PointPair) -> f64 {
        let p = self.apply(pair.source);
        (p[0] - pair.destination[0]).hypot(p[1] - pair.destination[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(threshold: f64) -> RansacParams {
        RansacParams {
            max_iterations: 500,
            threshold,
            confidence: 0.99,
            seed: 7,
        }
    }

    fn grid_points() -> Vec<Point> {
        (0..6)
            .flat_map(|i| (0..5).map(move |j| [20.0 + 37.0 * i as f64, 15.0 + 29.0 * j as f64]))
            .collect()
    }

    fn similarity(angle_deg: f64, scale: f64, tx: f64, ty: f64) -> Similarity {
        let theta = angle_deg.to_radians();
        Similarity {
            a: scale * theta.cos(),
            b: scale * theta.sin(),
            tx,
            ty,
        }
    }

    #[test]
    fn test_required_iterations() {
        assert_eq!(required_iterations(1.0, 4, 0.99, 2000), 1);
        assert_eq!(required_iterations(0.0, 4, 0.99, 2000), 2000);
        // 50% inliers, pairs: ln(0.01) / ln(0.75) = 16.008
        assert_eq!(required_iterations(0.5, 2, 0.99, 2000), 17);
    }

    #[test]
    fn test_similarity_exact_fit() {
        let truth = similarity(12.0, 1.1, 5.0, -3.0);
        let pairs: Vec<PointPair> = grid_points()
            .into_iter()
            .map(|p| PointPair::new(p, truth.apply(p)))
            .collect();

        let fitted = Similarity::fit(&pairs).unwrap();
        assert!((fitted.a - truth.a).abs() < 1e-9);
        assert!((fitted.b - truth.b).abs() < 1e-9);
        assert!((fitted.tx - truth.tx).abs() < 1e-6);
        assert!((fitted.ty - truth.ty).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_rejects_coincident_points() {
        let pairs = vec![
            PointPair::new([5.0, 5.0], [1.0, 1.0]),
            PointPair::new([5.0, 5.0], [2.0, 2.0]),
        ];
        assert!(Similarity::fit(&pairs).is_none());
    }

    #[test]
    fn test_ransac_ignores_outliers() {
        let truth = similarity(-4.0, 0.98, 12.0, 7.0);
        let mut pairs: Vec<PointPair> = grid_points()
            .into_iter()
            .map(|p| PointPair::new(p, truth.apply(p)))
            .collect();
        for (i, pair) in pairs.iter_mut().enumerate().filter(|(i, _)| i % 4 == 0) {
            pair.destination = [300.0 - 11.0 * i as f64, 3.0 * i as f64];
        }

        let fit = ransac::<Similarity>(&pairs, &params(3.0)).unwrap();
        assert!((fit.model.a - truth.a).abs() < 1e-6);
        assert!((fit.model.b - truth.b).abs() < 1e-6);
        assert_eq!(fit.inlier_count, pairs.len() - 8);
        assert!(!fit.inliers[0]);
        assert!(fit.inliers[1]);
    }

    #[test]
    fn test_ransac_is_reproducible() {
        let truth = similarity(2.0, 1.0, 0.0, 0.0);
        let pairs: Vec<PointPair> = grid_points()
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let mut d = truth.apply(p);
                d[0] += ((i * 13) % 5) as f64 * 0.3;
                PointPair::new(p, d)
            })
            .collect();

        let first = ransac::<Similarity>(&pairs, &params(1.0)).unwrap();
        let second = ransac::<Similarity>(&pairs, &params(1.0)).unwrap();
        assert_eq!(first.model, second.model);
        assert_eq!(first.inliers, second.inliers);
    }

    #[test]
    fn test_too_few_pairs() {
        let pairs = vec![PointPair::new([0.0, 0.0], [1.0, 1.0]); 3];
        match ransac::<Homography>(&pairs, &params(5.0)) {
            Err(EstimationFailure::TooFewCorrespondences {
                stage,
                found,
                required,
            }) => {
                assert_eq!(stage, "homography");
                assert_eq!(found, 3);
                assert_eq!(required, 4);
            }
            other => panic!("unexpected {:?}", other.map(|f| f.inlier_count)),
        }
    }

    #[test]
    fn test_homography_recovers_projective_map() {
        let truth = Homography(Matrix3::new(
            1.02, 0.05, 4.0, -0.03, 0.97, -6.0, 1e-4, -2e-4, 1.0,
        ));
        let pairs: Vec<PointPair> = grid_points()
            .into_iter()
            .map(|p| PointPair::new(p, truth.project(p).unwrap()))
            .collect();

        let fit = ransac::<Homography>(&pairs, &params(5.0)).unwrap();
        assert_eq!(fit.inlier_count, pairs.len());
        for pair in &pairs {
            assert!(fit.model.residual(pair) < 1e-6);
        }
    }

    #[test]
    fn test_homography_rejects_collinear_sample() {
        let pairs: Vec<PointPair> = (0..4)
            .map(|i| {
                let p = [i as f64 * 10.0, i as f64 * 10.0];
                PointPair::new(p, p)
            })
            .collect();
        assert!(Homography::fit(&pairs).is_none());
        assert!(matches!(
            ransac::<Homography>(&pairs, &params(5.0)),
            Err(EstimationFailure::DegenerateGeometry { stage: "homography" })
        ));
    }
}
