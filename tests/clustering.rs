use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Normal};
use smhmm_rs::HmmError;
use smhmm_rs::gmm::GaussianMixture;
use smhmm_rs::kmeans::kmeans;

fn bimodal(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let low = Normal::new(-2.0, 0.5).expect("low mode");
    let high = Normal::new(3.0, 0.8).expect("high mode");
    (0..n)
        .map(|i| {
            if i % 3 == 0 {
                high.sample(&mut rng)
            } else {
                low.sample(&mut rng)
            }
        })
        .collect()
}

#[test]
fn kmeans_sorts_centers_and_labels_consistently() {
    let x = [5.1, 0.1, 9.8, 4.9, 10.2, -0.1, 5.0, 10.0, 0.0];
    let mut rng = SmallRng::seed_from_u64(0);
    let fit = kmeans(&x, 3, 100, 5, &mut rng).expect("kmeans failed");
    assert!((fit.centers[0] - 0.0).abs() < 1e-9);
    assert!((fit.centers[1] - 5.0).abs() < 1e-9);
    assert!((fit.centers[2] - 10.0).abs() < 1e-9);
    assert_eq!(fit.labels, vec![1, 0, 2, 1, 2, 0, 1, 2, 0]);
    assert!(fit.inertia < 0.2);
}

#[test]
fn kmeans_is_deterministic_for_a_seed() {
    let x = bimodal(300, 8);
    let a = kmeans(&x, 4, 300, 10, &mut SmallRng::seed_from_u64(3)).expect("kmeans failed");
    let b = kmeans(&x, 4, 300, 10, &mut SmallRng::seed_from_u64(3)).expect("kmeans failed");
    assert_eq!(a.centers, b.centers);
    assert_eq!(a.labels, b.labels);
}

#[test]
fn kmeans_rejects_impossible_requests() {
    let mut rng = SmallRng::seed_from_u64(0);
    let err = kmeans(&[1.0, 2.0], 0, 10, 1, &mut rng).expect_err("k = 0");
    assert_eq!(
        err.downcast_ref::<HmmError>(),
        Some(&HmmError::InvalidStateCount { k: 0 })
    );
    assert!(kmeans(&[1.0, 2.0], 3, 10, 1, &mut rng).is_err());
    assert!(kmeans(&[1.0, f64::NAN, 2.0], 2, 10, 1, &mut rng).is_err());
}

#[test]
fn mixture_recovers_two_modes() {
    let x = bimodal(3000, 12);
    let mut rng = SmallRng::seed_from_u64(6);
    let gmm = GaussianMixture::fit(&x, 2, 500, 1e-8, &mut rng).expect("fit failed");
    assert!(gmm.converged);
    assert!((gmm.means[0] + 2.0).abs() < 0.1, "means {:?}", gmm.means);
    assert!((gmm.means[1] - 3.0).abs() < 0.1, "means {:?}", gmm.means);
    assert!((gmm.weights[0] - 2.0 / 3.0).abs() < 0.03);
    assert!((gmm.variances[0] - 0.25).abs() < 0.05);
    let total: f64 = gmm.weights.iter().sum();
    assert!((total - 1.0).abs() < 1e-12, "weights {:?}", gmm.weights);

    let all = [0, 1];
    let density = gmm.group_density(&all, -2.0);
    let manual = gmm.weights[0] * gmm.component_density(0, -2.0)
        + gmm.weights[1] * gmm.component_density(1, -2.0);
    assert!((density - manual).abs() < 1e-12);
    let alone = gmm.group_density(&[1], 3.0);
    assert!((alone - gmm.component_density(1, 3.0)).abs() < 1e-12);

    // Far outside both modes the density underflows but its log does not.
    assert_eq!(gmm.group_density(&all, 1e4), 0.0);
    let ln_far = gmm.group_log_density(&all, 1e4);
    assert!(ln_far.is_finite() && ln_far < -1e6, "ln density {ln_far}");
}
