use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

/// Files of one CLI run, removed again when the run goes out of scope.
struct Scratch {
    paths: Vec<PathBuf>,
}

impl Scratch {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    fn file(&mut self, name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "smhmm_cli_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ));
        self.paths.push(path.clone());
        path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = fs::remove_file(path);
        }
    }
}

fn smhmm(args: &[&str], files: &[&PathBuf]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_smhmm"));
    cmd.arg("--no-progress").args(args);
    for f in files {
        cmd.arg(f);
    }
    cmd.output().expect("failed to run smhmm")
}

fn assert_success(out: &Output, what: &str) {
    assert!(
        out.status.success(),
        "{what} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn level(m: usize, t: usize) -> f64 {
    if (t / 10 + m) % 2 == 0 { 0.2 } else { 0.8 }
}

/// Two-level staircase traces that switch every 10 frames; every line is
/// one sequence.
fn staircase(n_seqs: usize, frames: usize) -> String {
    let mut out = String::from("# synthetic two-level traces\n");
    for m in 0..n_seqs {
        let line: Vec<String> = (0..frames)
            .map(|t| {
                let jitter = ((t * 7 + m * 3) % 11) as f64 * 0.004 - 0.02;
                format!("{:.4}", level(m, t) + jitter)
            })
            .collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}

fn read_json(path: &PathBuf) -> Value {
    let text = fs::read_to_string(path).expect("failed to read model json");
    serde_json::from_str(&text).expect("model json is invalid")
}

fn means(doc: &Value) -> Vec<f64> {
    doc["mu"]
        .as_array()
        .expect("mu array")
        .iter()
        .map(|v| v.as_f64().expect("numeric mean"))
        .collect()
}

#[test]
fn trained_model_labels_every_frame_with_its_level() {
    let mut scratch = Scratch::new();
    let input = scratch.file("input.txt");
    let model = scratch.file("model.json");
    let paths = scratch.file("paths.tsv");
    fs::write(&input, staircase(3, 60)).expect("failed to write input");

    let out = smhmm(&["train", "-k", "2", "--seed", "1"], &[&input, &model]);
    assert_success(&out, "train");
    assert!(String::from_utf8_lossy(&out.stdout).contains("converged:"));
    let doc = read_json(&model);
    assert_eq!(doc["method"].as_str(), Some("em"));
    assert_eq!(doc["k"].as_u64(), Some(2));
    let mu = means(&doc);
    assert!((mu[0] - 0.2).abs() < 0.02, "means {mu:?}");
    assert!((mu[1] - 0.8).abs() < 0.02, "means {mu:?}");

    let out = smhmm(&["label"], &[&model, &input, &paths]);
    assert_success(&out, "label");
    let text = fs::read_to_string(&paths).expect("failed to read paths tsv");
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("seq_id\tframe\tstate\temission"));
    let mut rows = 0;
    for line in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        let m: usize = fields[0].parse().expect("seq_id");
        let t: usize = fields[1].parse().expect("frame");
        let state: usize = fields[2].parse().expect("state");
        let emission: f64 = fields[3].parse().expect("emission");
        let expected = if level(m, t) < 0.5 { 0 } else { 1 };
        assert_eq!(state, expected, "sequence {m} frame {t}");
        assert_eq!(emission, mu[state]);
        rows += 1;
    }
    assert_eq!(rows, 3 * 60);
}

#[test]
fn vb_trains_one_model_over_all_sequences() {
    let mut scratch = Scratch::new();
    let input = scratch.file("input.txt");
    let model = scratch.file("model.json");
    fs::write(&input, staircase(3, 60)).expect("failed to write input");

    let args = [
        "train",
        "-k",
        "2",
        "--method",
        "vb",
        "--all-sequences",
        "--restarts",
        "2",
        "--seed",
        "4",
    ];
    let out = smhmm(&args, &[&input, &model]);
    assert_success(&out, "train --all-sequences");
    let doc = read_json(&model);
    assert_eq!(doc["method"].as_str(), Some("vb"));
    assert!(doc.get("posterior").is_some());
    assert_eq!(doc["restarts"].as_array().map(Vec::len), Some(2));
    let mu = means(&doc);
    assert!((mu[0] - 0.2).abs() < 0.02, "means {mu:?}");
    assert!((mu[1] - 0.8).abs() < 0.02, "means {mu:?}");
}

#[test]
fn bad_training_requests_write_nothing() {
    let mut scratch = Scratch::new();
    let input = scratch.file("input.txt");
    let model = scratch.file("model.json");
    fs::write(&input, staircase(2, 20)).expect("failed to write input");

    let out = smhmm(&["train", "-k", "2", "--method", "gibbs"], &[&input, &model]);
    assert!(!out.status.success(), "unknown method must fail");
    assert!(!model.exists());

    let out = smhmm(&["train", "-k", "2", "--all-sequences"], &[&input, &model]);
    assert!(!out.status.success(), "EM cannot pool sequences");
    assert!(String::from_utf8_lossy(&out.stderr).contains("--all-sequences"));
    assert!(!model.exists());
}

#[test]
fn autobaseline_marks_the_bleach_frame_of_each_sequence() {
    let mut scratch = Scratch::new();
    let input = scratch.file("ab_input.txt");
    let output = scratch.file("ab_paths.tsv");
    let mut content = String::new();
    for m in 0..4 {
        let bleach = 30 + 5 * m;
        let line: Vec<String> = (0..60)
            .map(|t| {
                let jitter = ((t * 13 + m * 5) % 17) as f64 - 8.0;
                let v = if t < bleach { 500.0 + 3.0 * jitter } else { jitter };
                format!("{v:.1}")
            })
            .collect();
        content.push_str(&line.join(","));
        content.push('\n');
    }
    fs::write(&input, content).expect("failed to write input");

    let args = ["autobaseline", "--components", "2", "--points", "240", "--seed", "3"];
    let out = smhmm(&args, &[&input, &output]);
    assert_success(&out, "autobaseline");

    let text = fs::read_to_string(&output).expect("failed to read path matrix");
    let rows: Vec<Vec<usize>> = text
        .lines()
        .map(|l| l.split('\t').map(|s| s.parse().expect("state")).collect())
        .collect();
    assert_eq!(rows.len(), 4);
    for (m, row) in rows.iter().enumerate() {
        assert_eq!(row.len(), 60);
        let bleach = 30 + 5 * m;
        assert!(row[..bleach].iter().all(|&s| s == 0), "sequence {m}: {row:?}");
        assert!(row[bleach..].iter().all(|&s| s == 2), "sequence {m}: {row:?}");
    }
}
