use ndarray::{Array1, Array2, array};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use smhmm_rs::HmmError;
use smhmm_rs::distributions::{
    Categorical, CategoricalMatrix, Conjugate, Dirichlet, DirichletMatrix, Emission, GammaShape,
    MultimerNormalGamma, Normal, NormalGamma, NormalStats, Precision, Sample, StepStats,
};

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

fn hard_gamma(labels: &[usize], k: usize) -> Array2<f64> {
    let mut g = Array2::<f64>::zeros((labels.len(), k));
    for (t, &j) in labels.iter().enumerate() {
        g[(t, j)] = 1.0;
    }
    g
}

#[test]
fn categorical_rejects_vectors_off_the_simplex() {
    let err = Categorical::new(array![0.5, 0.6]).expect_err("sum 1.1 must be rejected");
    assert!(matches!(
        err.downcast_ref::<HmmError>(),
        Some(HmmError::NotSimplex { .. })
    ));
    let err = Categorical::new(array![1.2, -0.2]).expect_err("negative entry must be rejected");
    assert!(matches!(
        err.downcast_ref::<HmmError>(),
        Some(HmmError::NotSimplex { .. })
    ));

    let pi = Categorical::from_weights(&array![2.0, 6.0]).expect("weights normalise");
    approx_eq(pi.p()[0], 0.25, 1e-12);
    approx_eq(pi.p()[1], 0.75, 1e-12);
}

#[test]
fn categorical_matrix_validates_every_row() {
    let err = CategoricalMatrix::new(array![[0.9, 0.1], [0.3, 0.3]]).expect_err("row 1 is off");
    match err.downcast_ref::<HmmError>() {
        Some(HmmError::NotSimplex { what, sum }) => {
            assert!(what.contains("row 1"), "unexpected label {what}");
            approx_eq(*sum, 0.6, 1e-12);
        }
        other => panic!("unexpected error {other:?}"),
    }

    let a = CategoricalMatrix::with_self_transition(3, 10.0).expect("valid matrix");
    for row in a.p().outer_iter() {
        approx_eq(row.sum(), 1.0, 1e-12);
    }
    approx_eq(a.p()[(0, 0)], 10.0 / 12.0, 1e-12);
}

#[test]
fn categorical_matrix_update_divides_by_leading_occupancy() {
    let gamma = array![[1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0]];
    let xi = array![[1.0, 1.0], [0.0, 1.0]];
    let a = CategoricalMatrix::with_self_transition(2, 1.0).expect("A");
    let updated = a.update(&gamma, &xi).expect("update");
    assert_eq!(updated.p(), &array![[0.5, 0.5], [0.0, 1.0]]);

    let gamma = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0]];
    let xi = array![[2.0, 0.0], [0.0, 0.0]];
    let err = a.update(&gamma, &xi).expect_err("state 1 is never occupied");
    assert_eq!(
        err.downcast_ref::<HmmError>(),
        Some(&HmmError::DegenerateState { state: 1 })
    );
}

#[test]
fn normal_density_is_k_by_t() {
    let phi = Normal::new(array![0.0, 1.0], Precision::PerState(array![1.0, 4.0])).expect("phi");
    let d = phi.density(&[0.0, 1.0, 2.0]);
    assert_eq!(d.dim(), (2, 3));
    approx_eq(d[(0, 0)], 1.0 / (2.0 * std::f64::consts::PI).sqrt(), 1e-12);
    approx_eq(d[(1, 1)], (4.0 / (2.0 * std::f64::consts::PI)).sqrt(), 1e-12);
}

#[test]
fn shared_variance_update_pools_scatter() {
    let x = [0.0, 0.2, 1.0, 1.4, 1.0, 1.2];
    let labels = [0, 0, 1, 1, 1, 1];
    let gamma = hard_gamma(&labels, 2);

    let per_state = Normal::new(array![0.0, 1.0], Precision::PerState(array![1.0, 1.0]))
        .expect("phi")
        .update(&x, &gamma)
        .expect("update");
    approx_eq(per_state.mu()[0], 0.1, 1e-12);
    approx_eq(per_state.mu()[1], 1.15, 1e-12);
    approx_eq(per_state.variance()[0], 0.01, 1e-12);
    approx_eq(per_state.variance()[1], 0.0275, 1e-12);

    let shared = Normal::new(array![0.0, 1.0], Precision::Shared(1.0))
        .expect("phi")
        .update(&x, &gamma)
        .expect("update");
    assert!(shared.tau().is_shared());
    let pooled = (2.0 * 0.01 + 4.0 * 0.0275) / 6.0;
    approx_eq(shared.variance()[0], pooled, 1e-12);
    approx_eq(shared.variance()[1], pooled, 1e-12);
}

#[test]
fn normal_update_flags_unsupported_states() {
    let x = [0.0, 0.1, 0.2];
    let gamma = hard_gamma(&[0, 0, 0], 2);
    let err = Normal::new(array![0.0, 1.0], Precision::Shared(1.0))
        .expect("phi")
        .update(&x, &gamma)
        .expect_err("state 1 has no responsibility");
    assert_eq!(
        err.downcast_ref::<HmmError>(),
        Some(&HmmError::DegenerateState { state: 1 })
    );
}

#[test]
fn kl_of_a_distribution_with_itself_is_zero() {
    let dir = Dirichlet::new(array![1.0, 2.5, 4.0]).expect("dirichlet");
    approx_eq(dir.kl_divergence(&dir), 0.0, 1e-12);

    let dm = DirichletMatrix::new(array![[2.0, 1.0], [1.0, 3.0]]).expect("dirichlet matrix");
    approx_eq(dm.kl_divergence(&dm), 0.0, 1e-12);

    let ng = NormalGamma::new(
        array![0.2, 0.8],
        array![0.25, 0.25],
        GammaShape::PerState {
            a: array![2.5, 2.5],
            b: array![0.1, 0.1],
        },
    )
    .expect("normal-gamma");
    approx_eq(ng.kl_divergence(&ng), 0.0, 1e-12);

    let mm = MultimerNormalGamma::new(3, 20.0, 0.25, 250.0, 0.25, 10.0, 25000.0).expect("multimer");
    approx_eq(mm.kl_divergence(&mm), 0.0, 1e-12);
}

#[test]
fn kl_divergences_match_closed_form_values() {
    let uniform = Dirichlet::new(array![1.0, 1.0, 1.0]).expect("dirichlet");
    let peaked = Dirichlet::new(array![2.0, 3.0, 5.0]).expect("dirichlet");
    approx_eq(peaked.kl_divergence(&uniform), 0.768_034_844_169_189, 1e-8);

    let rows = DirichletMatrix::new(array![[2.0, 3.0, 5.0], [1.0, 1.0, 1.0]]).expect("matrix");
    let flat = DirichletMatrix::new(Array2::from_elem((2, 3), 1.0)).expect("matrix");
    approx_eq(rows.kl_divergence(&flat), 0.768_034_844_169_189, 1e-8);

    let prior = NormalGamma::new(
        array![0.5],
        array![0.25],
        GammaShape::PerState {
            a: array![2.5],
            b: array![0.1],
        },
    )
    .expect("prior");
    let post = NormalGamma::new(
        array![0.4],
        array![3.0],
        GammaShape::PerState {
            a: array![4.0],
            b: array![0.5],
        },
    )
    .expect("posterior");
    approx_eq(post.kl_divergence(&prior), 1.994_814_676_538_483, 1e-8);

    let prior = NormalGamma::new(
        array![0.5, 0.5],
        array![0.25, 0.25],
        GammaShape::Shared { a: 2.5, b: 0.01 },
    )
    .expect("prior");
    let post = NormalGamma::new(
        array![0.1, 0.9],
        array![2.0, 5.0],
        GammaShape::Shared { a: 3.5, b: 0.2 },
    )
    .expect("posterior");
    approx_eq(post.kl_divergence(&prior), 6.676_283_500_272_979, 1e-8);

    let prior = MultimerNormalGamma::new(3, 0.0, 0.25, 100.0, 0.25, 10.0, 25000.0).expect("prior");
    let post = MultimerNormalGamma::new(3, 21.0, 3.25, 248.0, 6.25, 14.5, 25010.0).expect("post");
    approx_eq(post.kl_divergence(&prior), 4.383_715_805_473_231, 1e-8);
}

#[test]
fn posteriors_move_away_from_the_prior() {
    let x = [0.1, 0.15, 0.05, 0.9, 0.85, 0.95];
    let gamma = hard_gamma(&[0, 0, 0, 1, 1, 1], 2);
    let stats = NormalStats::from_responsibilities(&x, &gamma).expect("stats");

    let prior = NormalGamma::new(
        Array1::from_elem(2, 0.5),
        Array1::from_elem(2, 0.25),
        GammaShape::Shared { a: 2.5, b: 0.01 },
    )
    .expect("prior");
    let post = prior.posterior(&stats).expect("posterior");

    approx_eq(post.beta()[0], 3.25, 1e-12);
    approx_eq(post.m()[0], (0.25 * 0.5 + 3.0 * 0.1) / 3.25, 1e-12);
    approx_eq(post.m()[1], (0.25 * 0.5 + 3.0 * 0.9) / 3.25, 1e-12);
    match post.gamma() {
        GammaShape::Shared { a, .. } => approx_eq(*a, 2.5 + 3.0, 1e-12),
        other => panic!("expected shared shape, got {other:?}"),
    }
    assert!(post.kl_divergence(&prior) > 0.0);

    let per_state = NormalGamma::new(
        Array1::from_elem(2, 0.5),
        Array1::from_elem(2, 0.25),
        GammaShape::PerState {
            a: Array1::from_elem(2, 2.5),
            b: Array1::from_elem(2, 0.1),
        },
    )
    .expect("prior");
    match per_state.posterior(&stats).expect("posterior").gamma() {
        GammaShape::PerState { a, .. } => assert_eq!(a, &array![4.0, 4.0]),
        other => panic!("expected per-state shape, got {other:?}"),
    }

    let dir = Dirichlet::new(array![1.0, 1.0]).expect("dirichlet");
    let dir_post = dir.posterior(&array![3.0, 1.0]).expect("posterior");
    assert_eq!(dir_post.alpha(), &array![4.0, 2.0]);
    assert!(dir_post.kl_divergence(&dir) > 0.0);
}

#[test]
fn multimer_posterior_tracks_offset_and_step() {
    let x = [20.0, 22.0, 18.0, 270.0, 268.0, 272.0, 520.0, 518.0, 522.0];
    let gamma = hard_gamma(&[0, 0, 0, 1, 1, 1, 2, 2, 2], 3);
    let stats = StepStats::from_responsibilities(&x, &gamma, 20.0).expect("stats");
    approx_eq(stats.n0, 3.0, 1e-12);
    approx_eq(stats.dbar, 20.0, 1e-12);
    approx_eq(stats.n_step, 6.0, 1e-12);
    approx_eq(stats.xbar, 250.0, 1e-12);

    let prior = MultimerNormalGamma::new(3, 0.0, 0.25, 100.0, 0.25, 10.0, 25000.0).expect("prior");
    let post = prior.posterior(&stats).expect("posterior");
    assert!((post.offset() - 20.0).abs() < 2.0, "offset {}", post.offset());
    assert!((post.step() - 250.0).abs() < 20.0, "step {}", post.step());
    let m = post.m();
    approx_eq(m[2] - m[1], m[1] - m[0], 1e-9);
}

#[test]
fn samples_respect_support() {
    let mut rng = SmallRng::seed_from_u64(3);
    let dir = Dirichlet::new(array![0.5, 1.0, 2.0]).expect("dirichlet");
    let ng = NormalGamma::new(
        array![0.2, 0.5, 0.8],
        Array1::from_elem(3, 0.25),
        GammaShape::Shared { a: 2.5, b: 0.01 },
    )
    .expect("normal-gamma");
    for _ in 0..20 {
        let p = dir.sample(&mut rng).expect("dirichlet draw");
        approx_eq(p.sum(), 1.0, 1e-9);
        assert!(p.iter().all(|v| *v >= 0.0));

        let draw = ng.sample(&mut rng).expect("normal-gamma draw");
        let mu = draw.mu.to_vec();
        assert!(mu.windows(2).all(|w| w[0] <= w[1]), "unsorted draw {mu:?}");
        assert!(draw.tau.get(0) > 0.0);
    }
}
