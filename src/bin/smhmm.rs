use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use std::path::PathBuf;

use smhmm_rs::io::model::{load_config, load_model, save_model};
use smhmm_rs::io::traces::{read_traces, write_path_matrix, write_paths};
use smhmm_rs::progress;
use smhmm_rs::task::{TaskEvent, TrainingTask};
use smhmm_rs::{AutoBaseline, AutoBaselineConfig, Initialization, Method, Model, TrainConfig};

#[derive(Parser, Debug)]
#[command(name = "smhmm")]
#[command(about = "HMM segmentation of single-molecule time series", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    threads: Option<usize>,
    #[arg(long, global = true)]
    no_progress: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model on one sequence (or all of them with VB) and write it as JSON
    Train(TrainArgs),
    /// Decode every sequence with a trained model
    Label(LabelArgs),
    /// Detect blinking and photobleaching across all sequences
    Autobaseline(AutoBaselineArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    input_file: PathBuf,
    output_file: PathBuf,
    #[arg(long, short = 'k')]
    states: usize,
    #[arg(long, default_value = "em", help = "Estimation method: em, vb or multimer")]
    method: Method,
    #[arg(long, default_value_t = 0, help = "Index of the sequence to train on")]
    sequence: usize,
    #[arg(
        long,
        conflicts_with = "sequence",
        help = "Train one VB model shared by every sequence in the file"
    )]
    all_sequences: bool,
    #[arg(long, help = "JSON training config; flags below override it")]
    config: Option<PathBuf>,
    #[arg(long)]
    max_iter: Option<usize>,
    #[arg(long)]
    tol: Option<f64>,
    #[arg(long)]
    restarts: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, help = "Give every state its own variance")]
    per_state_variance: bool,
    #[arg(long, help = "Initialise from quantiles instead of K-means")]
    quantiles: bool,
}

#[derive(Args, Debug)]
struct LabelArgs {
    model_file: PathBuf,
    input_file: PathBuf,
    output_file: PathBuf,
}

#[derive(Args, Debug)]
struct AutoBaselineArgs {
    input_file: PathBuf,
    output_file: PathBuf,
    #[arg(long, default_value_t = 100.0)]
    cutoff: f64,
    #[arg(long, default_value_t = 5)]
    components: usize,
    #[arg(long, default_value_t = 10_000)]
    points: usize,
    #[arg(long, default_value_t = 50)]
    max_iter: usize,
    #[arg(long, default_value_t = 1e-3)]
    tol: f64,
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    if let Some(n_threads) = cli.threads {
        if n_threads == 0 {
            bail!("--threads must be >= 1");
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .map_err(|e| anyhow!("failed to configure Rayon global thread pool: {e}"))?;
    }
    let show = !cli.no_progress;
    match cli.command {
        Command::Train(args) => train(args, show),
        Command::Label(args) => label(args, show),
        Command::Autobaseline(args) => autobaseline(args, show),
    }
}

fn train_config(args: &TrainArgs) -> Result<TrainConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => TrainConfig::default(),
    };
    if let Some(v) = args.max_iter {
        config.max_iter = v;
    }
    if let Some(v) = args.tol {
        config.tol = v;
    }
    if let Some(v) = args.restarts {
        config.restarts = v;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.per_state_variance {
        config.shared_variance = false;
    }
    if args.quantiles {
        config.init = Initialization::Quantiles;
    }
    config.validate()?;
    Ok(config)
}

fn train(args: TrainArgs, show: bool) -> Result<()> {
    let config = train_config(&args)?;
    let obs = read_traces(&args.input_file)?;
    let sequences = if args.all_sequences {
        if args.method == Method::Em {
            bail!("--all-sequences needs --method vb or multimer");
        }
        obs.sequences
    } else {
        let x = obs
            .sequences
            .get(args.sequence)
            .cloned()
            .with_context(|| {
                format!(
                    "sequence {} requested but {:?} holds {}",
                    args.sequence,
                    args.input_file,
                    obs.len()
                )
            })?;
        vec![x]
    };

    let (method, k) = (args.method, args.states);
    let label = format!("{method} K={k} on {} sequence(s)", sequences.len());
    let pb = progress::training("Train", &label, show);
    let task = TrainingTask::spawn(move |cancel| {
        Model::train_sequences(method, &sequences, k, &config, cancel)
    });
    let mut model = None;
    for event in task.events().iter() {
        match event {
            TaskEvent::Started => pb.set_message(format!("{method} K={k} running")),
            TaskEvent::Finished(result) => {
                model = Some(result?);
                break;
            }
        }
    }
    let model = model.context("training task ended without a result")?;
    pb.finish_with_message(format!("{method} K={k} done"));

    println!("{}", model.record());
    save_model(&args.output_file, &model)?;
    println!("Model: {}", args.output_file.display());
    Ok(())
}

fn label(args: LabelArgs, show: bool) -> Result<()> {
    let model = load_model(&args.model_file)?;
    let obs = read_traces(&args.input_file)?;
    let pb = progress::sequences(obs.len() as u64, "Label", "Decoding", show);
    let decoded: Vec<(Vec<usize>, Vec<f64>)> = obs
        .sequences
        .par_iter()
        .enumerate()
        .map(|(m, x)| {
            let path = model
                .label(x)
                .with_context(|| format!("failed to decode sequence {m}"))?;
            let emission = model.emission_path(&path)?;
            pb.inc(1);
            Ok((path, emission))
        })
        .collect::<Result<_>>()?;
    pb.finish_with_message("Decoding done");

    let (paths, emission): (Vec<_>, Vec<_>) = decoded.into_iter().unzip();
    write_paths(&args.output_file, &paths, &emission)?;
    println!("Paths: {}", args.output_file.display());
    Ok(())
}

fn autobaseline(args: AutoBaselineArgs, show: bool) -> Result<()> {
    let obs = read_traces(&args.input_file)?;
    if !obs.is_rectangular() {
        bail!("autobaseline needs sequences of equal length");
    }
    let config = AutoBaselineConfig {
        cutoff: args.cutoff,
        n_components: args.components,
        n_points: args.points,
        max_iter: args.max_iter,
        tol: args.tol,
        seed: args.seed,
        ..AutoBaselineConfig::default()
    };
    let pb = progress::training("AutoBaseline", &format!("{} sequences", obs.len()), show);
    let fit = AutoBaseline::fit(&obs.sequences, &config)?;
    pb.finish_with_message("AutoBaseline done");

    println!("{}", fit.record());
    write_path_matrix(&args.output_file, fit.paths())?;
    println!("Paths: {}", args.output_file.display());
    Ok(())
}
