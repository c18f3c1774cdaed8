use crate::grid::{CollisionResultsGrid, GridError};
use crate::model_parameters::ModelParameters;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version tag written to every metadata file.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Persist one per-pair result grid.
///
/// Two files are written next to each other in `directory`:
/// `collisions_<p1>_<p2>.csv` with one `m,n,j,k,result,error,status` row
/// per tensor cell, and `collisions_<p1>_<p2>.meta.csv` with key/value
/// rows describing the run (schema version, basis size, master seed,
/// grid reduction, model parameters). Returns the data file path.
pub fn write_results_grid(
    directory: &Path,
    grid: &CollisionResultsGrid,
    master_seed: u64,
    parameters: &ModelParameters,
) -> Result<PathBuf, StorageError> {
    fs::create_dir_all(directory)?;
    let (name1, name2) = grid.particle_pair();
    let stem = format!("collisions_{}_{}", name1, name2);
    let data_path = directory.join(format!("{}.csv", stem));
    let meta_path = directory.join(format!("{}.meta.csv", stem));

    let mut data = csv::Writer::from_path(&data_path)?;
    data.write_record(["m", "n", "j", "k", "result", "error", "status"])?;
    for point in grid.points() {
        data.write_record([
            point.m.to_string(),
            point.n.to_string(),
            point.j.to_string(),
            point.k.to_string(),
            format!("{:.17e}", grid.result(point)?),
            format!("{:.17e}", grid.error(point)?),
            grid.status(point)?.label().to_string(),
        ])?;
    }
    data.flush()?;

    let mut meta = csv::Writer::from_path(&meta_path)?;
    meta.write_record(["key", "value"])?;
    let rows = [
        ("schema_version", SCHEMA_VERSION.to_string()),
        ("basis_size", grid.basis_size().to_string()),
        ("master_seed", master_seed.to_string()),
        ("reduction", grid.reduction().label().to_string()),
        ("particle_pair", format!("{}_{}", name1, name2)),
    ];
    for (key, value) in rows {
        meta.write_record([key.to_string(), value])?;
    }
    for (name, value) in parameters.iter() {
        meta.write_record([format!("param.{}", name), format!("{:.17e}", value)])?;
    }
    meta.flush()?;

    Ok(data_path)
}

/// Read back the key/value rows of a metadata file.
pub fn read_metadata(path: &Path) -> Result<Vec<(String, String)>, StorageError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() >= 2 {
            rows.push((record[0].to_string(), record[1].to_string()));
        }
    }
    Ok(rows)
}
