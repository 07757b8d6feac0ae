//! Batch Scorer
//!
//! Reads patient rows as JSON lines, scores them with the configured model
//! and writes each row back with `predict_proba` and `prediction` appended.
//!
//! Usage: score_batch [input] [output] [config]

use anyhow::{bail, Context, Result};
use caries_scoring::{
    config::AppConfig,
    models::{self, ScoredModel},
    RawRecord,
};
use chrono::Utc;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::time::Instant;
use tracing::{info, warn};

fn read_rows(reader: impl BufRead) -> Result<Vec<RawRecord>> {
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("Line {} is not valid JSON", idx + 1))?;
        match RawRecord::from_value(value) {
            Some(row) => rows.push(row),
            None => bail!("Line {} is not a JSON object", idx + 1),
        }
    }
    Ok(rows)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("score_batch=info".parse()?)
                .add_directive("caries_scoring=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let input = args.get(1).map(|s| s.as_str()).unwrap_or("-");
    let output = args.get(2).map(|s| s.as_str()).unwrap_or("-");
    let config_path = args
        .get(3)
        .map(|s| s.as_str())
        .unwrap_or("config/config.toml");

    let config = AppConfig::load_from_path(config_path)?;
    let registry = models::from_config(&config.model);
    let model = ScoredModel::new(&config.model.name, &config.model.alias, registry.as_ref())?;

    let rows = if input == "-" {
        read_rows(io::stdin().lock())?
    } else {
        let file = File::open(input).with_context(|| format!("Failed to open {}", input))?;
        read_rows(BufReader::new(file))?
    };
    info!(rows = rows.len(), input = %input, "Loaded patient rows");

    let start = Instant::now();
    let result = model.predict(&rows)?;
    let elapsed = start.elapsed();

    for unknown in &result.unknown_categories {
        warn!(
            field = unknown.field,
            values = ?unknown.values,
            "Unknown categories scored as missing"
        );
    }

    let mut writer: Box<dyn Write> = if output == "-" {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else {
        let file = File::create(output).with_context(|| format!("Failed to create {}", output))?;
        Box::new(BufWriter::new(file))
    };

    let scored_at = Utc::now().to_rfc3339();
    for row in &result.rows {
        let mut value = serde_json::to_value(row)?;
        if let Value::Object(map) = &mut value {
            map.insert("scored_at".to_string(), Value::from(scored_at.as_str()));
        }
        serde_json::to_writer(&mut writer, &value)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    let positives = result.labels().iter().filter(|&&l| l == 1).count();
    info!(
        rows = result.len(),
        positives = positives,
        model = %model.reference(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Batch scored"
    );
    Ok(())
}
