//! Dataset directories: one headed CSV file per payload block.
//!
//! `X.csv` with several columns becomes a matrix block, `y.csv` with a
//! single column a vector block. Block names are the file stems.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use parflow_core::data::{Block, DataError, DataFlow, Matrix};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{}: row {row}: {detail}", path.display())]
    Parse {
        path: PathBuf,
        row: usize,
        detail: String,
    },
    #[error("{} holds no rows", .0.display())]
    Empty(PathBuf),
    #[error("no CSV files in {}", .0.display())]
    NoBlocks(PathBuf),
    #[error("block '{0}' cannot be written as CSV")]
    Unsupported(String),
    #[error(transparent)]
    Shape(#[from] DataError),
}

fn csv_err(path: &Path) -> impl FnOnce(csv::Error) -> DatasetError + '_ {
    move |source| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Read one CSV file into a block.
pub fn load_block(path: &Path) -> Result<Block, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err(path))?;
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err(path))?;
        let row = record
            .iter()
            .map(|field| {
                field.parse::<f64>().map_err(|e| DatasetError::Parse {
                    path: path.to_path_buf(),
                    row: i + 1,
                    detail: format!("'{field}': {e}"),
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(DatasetError::Empty(path.to_path_buf()));
    }
    if rows.iter().all(|r| r.len() == 1) {
        return Ok(Block::Vector(rows.into_iter().map(|r| r[0]).collect()));
    }
    Ok(Block::Matrix(Matrix::from_rows(rows)?))
}

/// Load every `*.csv` file of `dir`.
pub fn load_dataset(dir: &Path) -> Result<DataFlow, DatasetError> {
    let entries = fs::read_dir(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(DatasetError::NoBlocks(dir.to_path_buf()));
    }

    let mut data = DataFlow::new();
    for path in files {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let block = load_block(&path)?;
        debug!(block = %name, rows = ?block.n_rows(), "loaded dataset block");
        data.insert(name, block);
    }
    Ok(data)
}

/// Write the vector and matrix blocks of `data` as `<dir>/<name>.csv`.
pub fn save_dataset(dir: &Path, data: &DataFlow) -> Result<(), DatasetError> {
    fs::create_dir_all(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for (name, block) in data.iter() {
        let path = dir.join(format!("{name}.csv"));
        let mut writer = csv::Writer::from_path(&path).map_err(csv_err(&path))?;
        match block {
            Block::Vector(values) => {
                writer.write_record([name.as_str()]).map_err(csv_err(&path))?;
                for v in values {
                    writer.write_record([v.to_string()]).map_err(csv_err(&path))?;
                }
            }
            Block::Matrix(m) => {
                let header: Vec<String> = (0..m.cols()).map(|j| format!("{name}{j}")).collect();
                writer.write_record(&header).map_err(csv_err(&path))?;
                for row in m.iter_rows() {
                    writer
                        .write_record(row.iter().map(f64::to_string))
                        .map_err(csv_err(&path))?;
                }
            }
            Block::Scalar(_) | Block::Text(_) => return Err(DatasetError::Unsupported(name.clone())),
        }
        writer.flush().map_err(|source| DatasetError::Io {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}
