//! Synthetic Cohort Generator
//!
//! Writes synthetic patient questionnaire rows as JSON lines, for smoke
//! testing the scoring service and the batch scorer.
//!
//! Usage: cohort_generator [count] [unknown_rate] [output]

use anyhow::{Context, Result};
use caries_scoring::schema::{FeatureKind, CARIES_SCHEMA};
use chrono::Utc;
use rand::Rng;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use tracing::info;

const MEAN_AGE: f64 = 30.0;
const MEAN_BREAST_FEEDING_MONTHS: f64 = 12.0;

/// Patient row generator
struct CohortGenerator {
    rng: rand::rngs::ThreadRng,
    unknown_rate: f64,
    patient_counter: u64,
}

impl CohortGenerator {
    fn new(unknown_rate: f64) -> Self {
        Self {
            rng: rand::thread_rng(),
            unknown_rate,
            patient_counter: 0,
        }
    }

    /// Knuth's method, adequate for the small means used here
    fn poisson(&mut self, lambda: f64) -> u64 {
        let limit = (-lambda).exp();
        let mut k = 0;
        let mut p = 1.0;
        loop {
            p *= self.rng.gen::<f64>();
            if p <= limit {
                return k;
            }
            k += 1;
        }
    }

    fn generate(&mut self) -> Value {
        self.patient_counter += 1;
        let mut row = Map::new();
        row.insert(
            "patient_id".to_string(),
            Value::from(format!("pt_{:08}", self.patient_counter)),
        );

        for feature in CARIES_SCHEMA.features {
            let value = match feature.kind {
                FeatureKind::Categorical(levels) => {
                    if self.rng.gen_bool(self.unknown_rate) {
                        Value::from(format!("unlisted_{}", self.rng.gen_range(0..100)))
                    } else {
                        Value::from(levels[self.rng.gen_range(0..levels.len())])
                    }
                }
                FeatureKind::Numeric => {
                    let mean = if feature.name == "breast_feeding_month" {
                        MEAN_BREAST_FEEDING_MONTHS
                    } else {
                        MEAN_AGE
                    };
                    Value::from(self.poisson(mean))
                }
            };
            row.insert(feature.name.to_string(), value);
        }

        row.insert(
            "recorded_at".to_string(),
            Value::from(Utc::now().to_rfc3339()),
        );
        Value::Object(row)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cohort_generator=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let count: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(100);
    let unknown_rate: f64 = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0_f64)
        .clamp(0.0, 1.0);
    let output = args.get(3).map(|s| s.as_str()).unwrap_or("-");

    info!(
        count = count,
        unknown_rate = unknown_rate,
        output = %output,
        schema = CARIES_SCHEMA.version,
        "Generating synthetic cohort"
    );

    let mut writer: Box<dyn Write> = if output == "-" {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else {
        let file = File::create(output).with_context(|| format!("Failed to create {}", output))?;
        Box::new(BufWriter::new(file))
    };

    let mut generator = CohortGenerator::new(unknown_rate);
    for _ in 0..count {
        serde_json::to_writer(&mut writer, &generator.generate())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!("Completed! Wrote {} patient rows", count);
    Ok(())
}
