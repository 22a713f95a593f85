use anyhow::{Context, Result, bail};
use flate2::read::MultiGzDecoder;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::Observations;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Buffered reader over `path`; gzip input is recognised by its magic bytes,
/// whatever the file is called.
fn open_traces(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let mut reader = BufReader::new(file);
    let head = reader
        .fill_buf()
        .with_context(|| format!("failed to read {:?}", path))?;
    if head.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Reads one sequence per line. Values may be separated by whitespace,
/// commas or tabs; blank lines and lines starting with `#` are skipped.
pub fn read_traces(path: &Path) -> Result<Observations> {
    let reader = open_traces(path)?;
    read_sequences(reader).with_context(|| format!("failed to parse {:?}", path))
}

pub fn parse_traces(content: &str) -> Result<Observations> {
    read_sequences(content.as_bytes())
}

fn parse_sequence(line: &str, lineno: usize) -> Result<Vec<f64>> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .map(|field| -> Result<f64> {
            let v: f64 = field
                .parse()
                .with_context(|| format!("line {lineno}: invalid value {field:?}"))?;
            if !v.is_finite() {
                bail!("line {lineno}: non-finite value {field:?}");
            }
            Ok(v)
        })
        .collect()
}

fn read_sequences<R: BufRead>(reader: R) -> Result<Observations> {
    let mut sequences = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("line {}: read failed", i + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        sequences.push(parse_sequence(line, i + 1)?);
    }
    Ok(Observations { sequences })
}

/// Writes decoded paths as TSV: `seq_id`, `frame`, `state`, `emission`.
pub fn write_paths(path: &Path, paths: &[Vec<usize>], emission: &[Vec<f64>]) -> Result<()> {
    if paths.len() != emission.len() {
        bail!(
            "{} paths but {} emission paths were given",
            paths.len(),
            emission.len()
        );
    }
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "seq_id\tframe\tstate\temission")?;
    for (m, (states, values)) in paths.iter().zip(emission).enumerate() {
        for (t, (s, v)) in states.iter().zip(values).enumerate() {
            writeln!(writer, "{m}\t{t}\t{s}\t{v}")?;
        }
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

/// Writes an M x T path matrix as TSV, one sequence per row.
pub fn write_path_matrix(path: &Path, paths: &Array2<usize>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    for row in paths.outer_iter() {
        let line: Vec<String> = row.iter().map(|s| s.to_string()).collect();
        writeln!(writer, "{}", line.join("\t"))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}
