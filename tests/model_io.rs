use ndarray::array;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use smhmm_rs::distributions::{Categorical, CategoricalMatrix, Normal, Precision};
use smhmm_rs::io::model::{load_config, load_model, save_config, save_model};
use smhmm_rs::{HmmError, Initialization, Method, Model, ModelDocument, TrainConfig};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before unix epoch")
        .as_nanos();
    path.push(format!("{prefix}_{}_{}.{}", std::process::id(), nanos, ext));
    path
}

fn trace(seed: u64) -> Vec<f64> {
    let truth = Model::from_parameters(
        Categorical::uniform(2).expect("pi"),
        CategoricalMatrix::with_self_transition(2, 15.0).expect("A"),
        Normal::new(array![0.25, 0.75], Precision::Shared(150.0)).expect("phi"),
    )
    .expect("model");
    let mut rng = SmallRng::seed_from_u64(seed);
    truth.simulate(300, &mut rng).expect("simulate failed").1
}

fn config() -> TrainConfig {
    TrainConfig {
        restarts: 3,
        seed: Some(42),
        ..TrainConfig::default()
    }
}

#[test]
fn em_document_roundtrips_through_json() {
    let model = Model::train(Method::Em, &trace(1), 2, &config()).expect("EM failed");
    let json = serde_json::to_string(&model.to_document()).expect("serialize");
    assert!(json.contains("\"method\":\"em\""));
    assert!(!json.contains("\"prior\""));

    let doc: ModelDocument = serde_json::from_str(&json).expect("deserialize");
    let restored = Model::from_document(doc).expect("restore");
    assert_eq!(restored, model);
}

#[test]
fn vb_document_keeps_prior_and_posterior() {
    let model = Model::train(Method::Vb, &trace(2), 2, &config()).expect("VB failed");
    let json = serde_json::to_string(&model.to_document()).expect("serialize");
    assert!(json.contains("\"method\":\"vb\""));

    let doc: ModelDocument = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(doc.restarts.len(), 3);
    let restored = Model::from_document(doc).expect("restore");
    assert_eq!(restored, model);
    assert!(restored.posterior().is_some());
}

#[test]
fn per_state_variance_roundtrips_through_a_file() {
    let config = TrainConfig {
        shared_variance: false,
        init: Initialization::Quantiles,
        ..config()
    };
    let x = trace(3);
    let model = Model::train(Method::Em, &x, 2, &config).expect("EM failed");
    assert!(!model.is_shared_variance());

    let path = unique_temp_path("smhmm_model", "json");
    save_model(&path, &model).expect("save model");
    let restored = load_model(&path).expect("load model");
    let _ = fs::remove_file(&path);

    assert_eq!(restored, model);
    assert_eq!(
        restored.label(&x).expect("label"),
        model.label(&x).expect("label")
    );
}

#[test]
fn inconsistent_documents_are_rejected() {
    let model = Model::train(Method::Em, &trace(4), 2, &config()).expect("EM failed");

    let mut doc = model.to_document();
    doc.method = Method::Vb;
    let err = Model::from_document(doc).expect_err("vb without hyperparameters");
    assert!(matches!(
        err.downcast_ref::<HmmError>(),
        Some(HmmError::UnknownMethod(_))
    ));

    let mut doc = model.to_document();
    doc.pi = vec![0.9, 0.2];
    let err = Model::from_document(doc).expect_err("pi off the simplex");
    assert!(matches!(
        err.downcast_ref::<HmmError>(),
        Some(HmmError::NotSimplex { .. })
    ));

    let mut doc = model.to_document();
    doc.tau = vec![1.0, 2.0, 3.0];
    let err = Model::from_document(doc).expect_err("wrong precision count");
    assert!(matches!(
        err.downcast_ref::<HmmError>(),
        Some(HmmError::LengthMismatch { .. })
    ));
}

#[test]
fn config_file_roundtrips_and_is_validated() {
    let path = unique_temp_path("smhmm_config", "json");
    let config = TrainConfig {
        max_iter: 250,
        seed: Some(9),
        init: Initialization::Quantiles,
        ..TrainConfig::default()
    };
    save_config(&path, &config).expect("save config");
    assert_eq!(load_config(&path).expect("load config"), config);

    fs::write(&path, r#"{"restarts": 0}"#).expect("write config");
    let err = load_config(&path).expect_err("zero restarts");
    let _ = fs::remove_file(&path);
    assert!(matches!(
        err.downcast_ref::<HmmError>(),
        Some(HmmError::InvalidParameter {
            name: "restarts",
            ..
        })
    ));
}
