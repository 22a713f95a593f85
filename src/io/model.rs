use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::model::{Model, ModelDocument};
use crate::opt::TrainConfig;

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let value =
        serde_json::from_reader(reader).with_context(|| format!("failed to parse {:?}", path))?;
    Ok(value)
}

pub fn save_model(path: &Path, model: &Model) -> Result<()> {
    save_json(path, &model.to_document())
}

pub fn load_model(path: &Path) -> Result<Model> {
    let doc: ModelDocument = load_json(path)?;
    Model::from_document(doc).with_context(|| format!("invalid model in {:?}", path))
}

pub fn save_config(path: &Path, config: &TrainConfig) -> Result<()> {
    save_json(path, config)
}

pub fn load_config(path: &Path) -> Result<TrainConfig> {
    let config: TrainConfig = load_json(path)?;
    config.validate()?;
    Ok(config)
}
