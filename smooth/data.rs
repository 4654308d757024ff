//! # CSV Input and Output
//!
//! Reads the four observation shapes, posterior draw matrices and optional
//! per-cell covariates from comma-separated files with fixed column names,
//! and writes trajectory summaries back out.
//!
//! | shape      | columns                                  |
//! |------------|------------------------------------------|
//! | coalescent | `time,count` (count optional, default 1) |
//! | sampling   | `time,count`                             |
//! | count      | `time,exposure,count`                    |
//! | binomial   | `time,trials,successes`                  |
//! | survival   | `time,event[,entry]` (event is 0 or 1)   |
//!
//! Draw and covariate files have a header row followed by one numeric row per
//! draw (or per cell). Lines starting with `#` are ignored everywhere.

use crate::likelihood::{
    BinomialData, BinomialRecord, CoalescentData, CountData, CountRecord, LikelihoodFamily,
    Observations, SurvivalData, SurvivalRecord,
};
use crate::posterior::TrajectorySummary;
use ndarray::{Array2, Array3, ArrayView2};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File '{0}' contains no data rows.")]
    Empty(PathBuf),

    #[error("Row {row} of '{path}' holds a non-numeric or non-finite value '{value}'.")]
    InvalidNumber {
        path: PathBuf,
        row: usize,
        value: String,
    },

    #[error("Survival event indicator must be 0 or 1, found {0}.")]
    InvalidEventIndicator(u8),

    #[error("{draws} draws cannot be split evenly into {chains} chains.")]
    UnevenChains { draws: usize, chains: usize },
}

#[derive(Debug, Deserialize)]
struct TimedCount {
    time: f64,
    #[serde(default = "one")]
    count: usize,
}

fn one() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct SurvivalRow {
    time: f64,
    event: u8,
    #[serde(default)]
    entry: Option<f64>,
}

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>, DataError> {
    Ok(csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)?)
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DataError> {
    let rows = reader(path)?
        .deserialize()
        .collect::<Result<Vec<T>, _>>()?;
    if rows.is_empty() {
        return Err(DataError::Empty(path.to_path_buf()));
    }
    Ok(rows)
}

/// Loads a genealogy; without a sampling file all tips are sampled at time zero.
pub fn load_coalescent(events: &Path, samples: Option<&Path>) -> Result<CoalescentData, DataError> {
    let mut coalescent_times: Vec<f64> = read_rows::<TimedCount>(events)?
        .into_iter()
        .flat_map(|row| std::iter::repeat_n(row.time, row.count))
        .collect();
    coalescent_times.sort_by(f64::total_cmp);

    let data = match samples {
        Some(path) => {
            let (times, counts) = read_rows::<TimedCount>(path)?
                .into_iter()
                .map(|row| (row.time, row.count))
                .unzip();
            CoalescentData::new(times, counts, coalescent_times)
        }
        None => {
            let tips = coalescent_times.len() + 1;
            CoalescentData::isochronous(tips, coalescent_times)
        }
    };
    log::info!(
        "Loaded {} coalescent events and {} sampled tips from '{}'",
        data.coalescent_times.len(),
        data.total_sampled(),
        events.display()
    );
    Ok(data)
}

pub fn load_counts(path: &Path) -> Result<CountData, DataError> {
    let records: Vec<CountRecord> = read_rows(path)?;
    log::info!("Loaded {} count records from '{}'", records.len(), path.display());
    Ok(CountData::new(records))
}

pub fn load_binomial(path: &Path) -> Result<BinomialData, DataError> {
    let records: Vec<BinomialRecord> = read_rows(path)?;
    log::info!("Loaded {} binomial records from '{}'", records.len(), path.display());
    Ok(BinomialData::new(records))
}

pub fn load_survival(path: &Path) -> Result<SurvivalData, DataError> {
    let records = read_rows::<SurvivalRow>(path)?
        .into_iter()
        .map(|row| {
            let record = match row.event {
                0 => SurvivalRecord::censored(row.time),
                1 => SurvivalRecord::observed(row.time),
                other => return Err(DataError::InvalidEventIndicator(other)),
            };
            Ok(match row.entry {
                Some(entry) => record.entering_at(entry),
                None => record,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    log::info!("Loaded {} survival records from '{}'", records.len(), path.display());
    Ok(SurvivalData::new(records))
}

/// Loads observations of `family`; `samples` is only read for coalescent data.
pub fn load_observations(
    family: LikelihoodFamily,
    data: &Path,
    samples: Option<&Path>,
) -> Result<Observations, DataError> {
    if samples.is_some() && family != LikelihoodFamily::Coalescent {
        log::warn!("Ignoring the sampling file: it only applies to coalescent data");
    }
    Ok(match family {
        LikelihoodFamily::Coalescent => Observations::Coalescent(load_coalescent(data, samples)?),
        LikelihoodFamily::Count => Observations::Count(load_counts(data)?),
        LikelihoodFamily::Binomial => Observations::Binomial(load_binomial(data)?),
        LikelihoodFamily::Survival => Observations::Survival(load_survival(data)?),
    })
}

/// Reads a headed numeric matrix, one row per record.
pub fn load_matrix(path: &Path) -> Result<Array2<f64>, DataError> {
    let mut reader = reader(path)?;
    let width = reader.headers()?.len();
    let mut values = Vec::new();
    let mut rows = 0;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        for field in record.iter() {
            let value = field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| DataError::InvalidNumber {
                    path: path.to_path_buf(),
                    row: row + 1,
                    value: field.to_string(),
                })?;
            values.push(value);
        }
        rows += 1;
    }
    if rows == 0 {
        return Err(DataError::Empty(path.to_path_buf()));
    }
    Ok(Array2::from_shape_fn((rows, width), |(r, c)| values[r * width + c]))
}

/// Link-scale field draws: one row per draw, one column per cell.
pub fn load_draws(path: &Path) -> Result<Array2<f64>, DataError> {
    let draws = load_matrix(path)?;
    log::info!(
        "Loaded {} draws of {} cells from '{}'",
        draws.nrows(),
        draws.ncols(),
        path.display()
    );
    Ok(draws)
}

/// Per-cell covariates: one row per grid cell, one column per covariate.
pub fn load_covariates(path: &Path) -> Result<Array2<f64>, DataError> {
    load_matrix(path)
}

/// Regroups consecutive blocks of draws into `[chains, draws, cells]`.
pub fn split_chains(draws: ArrayView2<f64>, chains: usize) -> Result<Array3<f64>, DataError> {
    let total = draws.nrows();
    if chains == 0 || total % chains != 0 {
        return Err(DataError::UnevenChains {
            draws: total,
            chains,
        });
    }
    let per_chain = total / chains;
    Ok(Array3::from_shape_fn(
        (chains, per_chain, draws.ncols()),
        |(chain, draw, cell)| draws[[chain * per_chain + draw, cell]],
    ))
}

pub fn write_summary(path: &Path, summary: &TrajectorySummary) -> Result<(), DataError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in summary.rows() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::info!("Wrote trajectory summary to '{}'", path.display());
    Ok(())
}
