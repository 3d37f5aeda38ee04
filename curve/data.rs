//! # Survival Data Loading
//!
//! Reads the two-column measurement file (time, survival) into `ndarray` vectors.
//! The first column is time and the second the survival measurement; any further
//! columns are ignored. Failures are assumed to be user-input errors, so every
//! `DataError` names the column and the problem.

use std::fs::File;
use std::path::Path;

use ndarray::Array1;
use polars::prelude::*;
use thiserror::Error;

/// Fewest rows a measurement file can hold and still be differentiated.
const MINIMUM_ROWS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataOptions {
    pub delimiter: u8,
    pub has_header: bool,
}

impl Default for DataOptions {
    fn default() -> Self {
        Self {
            delimiter: b'\t',
            has_header: false,
        }
    }
}

/// A raw survival measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivalData {
    pub t: Array1<f64>,
    pub s: Array1<f64>,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The input file has {0} column(s); a time column and a survival column are required.")]
    MissingColumns(usize),
    #[error(
        "The {column} column could not be converted to numbers. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the {0} column.")]
    MissingValuesFound(&'static str),
    #[error("Non-finite values (NaN or Infinity) were found in the {0} column.")]
    NonFiniteValuesFound(&'static str),
    #[error("Input file contains only {found} data rows, but at least {required} are required.")]
    InsufficientRows { found: usize, required: usize },
}

/// Loads the time and survival columns of a delimited text file.
pub fn load_series(path: &Path, options: &DataOptions) -> Result<SurvivalData, DataError> {
    log::info!("Loading survival data from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(options.has_header)
                .with_infer_schema_length(None)
                .with_parse_options(
                    CsvParseOptions::default().with_separator(options.delimiter),
                ),
        )
        .finish()?;

    if df.width() < 2 {
        return Err(DataError::MissingColumns(df.width()));
    }
    if df.height() < MINIMUM_ROWS {
        return Err(DataError::InsufficientRows {
            found: df.height(),
            required: MINIMUM_ROWS,
        });
    }

    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    let t = extract_numeric_column(&df, &names[0], "time")?;
    let s = extract_numeric_column(&df, &names[1], "survival")?;

    log::info!("Loaded {} samples", t.len());
    Ok(SurvivalData {
        t: Array1::from_vec(t),
        s: Array1::from_vec(s),
    })
}

fn extract_numeric_column(
    df: &DataFrame,
    name: &str,
    role: &'static str,
) -> Result<Vec<f64>, DataError> {
    let series = df.column(name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(role));
    }

    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| DataError::ColumnWrongType {
            column: role,
            found_type: format!("{:?}", series.dtype()),
        })?;
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column: role,
            found_type: format!("{:?}", series.dtype()),
        });
    }

    let values: Vec<f64> = casted.f64()?.rechunk().into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(role));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_tab_separated_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("film.tsv");
        fs::write(&path, "0\t120\n1.5\t96\n3\t60\n4.5\t12\n").unwrap();

        let data = load_series(&path, &DataOptions::default()).unwrap();
        assert_eq!(data.t, array![0.0, 1.5, 3.0, 4.5]);
        assert_eq!(data.s, array![120.0, 96.0, 60.0, 12.0]);
    }

    #[test]
    fn loads_with_header_and_custom_delimiter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("film.csv");
        fs::write(&path, "hours,alive,batch\n0,1.0,a\n2,0.5,a\n4,0.25,b\n").unwrap();

        let options = DataOptions {
            delimiter: b',',
            has_header: true,
        };
        let data = load_series(&path, &options).unwrap();
        assert_eq!(data.t, array![0.0, 2.0, 4.0]);
        assert_eq!(data.s, array![1.0, 0.5, 0.25]);
    }

    #[test]
    fn integer_prefix_does_not_fix_column_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frames.tsv");
        let mut text: String = (0..150).map(|i| format!("{i}\t{}\n", 1000 - i)).collect();
        text.push_str("150.5\t849.5\n");
        fs::write(&path, text).unwrap();

        let data = load_series(&path, &DataOptions::default()).unwrap();
        assert_eq!(data.t.len(), 151);
        assert_eq!(data.t[149], 149.0);
        assert_eq!(data.t[150], 150.5);
        assert_eq!(data.s[0], 1000.0);
        assert_eq!(data.s[150], 849.5);
    }

    #[test]
    fn rejects_single_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.tsv");
        fs::write(&path, "0\n1\n2\n").unwrap();
        assert!(matches!(
            load_series(&path, &DataOptions::default()),
            Err(DataError::MissingColumns(1))
        ));
    }

    #[test]
    fn rejects_text_in_survival_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        fs::write(&path, "0\t1.0\n1\tlots\n2\t0.5\n").unwrap();
        assert!(matches!(
            load_series(&path, &DataOptions::default()),
            Err(DataError::ColumnWrongType {
                column: "survival",
                ..
            })
        ));
    }

    #[test]
    fn rejects_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_series(&dir.path().join("absent.tsv"), &DataOptions::default()),
            Err(DataError::IoError(_))
        ));
    }
}
