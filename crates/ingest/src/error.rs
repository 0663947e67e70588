use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Missing required columns in '{path}': {}", missing.join(", "))]
    Schema { path: PathBuf, missing: Vec<String> },

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Language '{lang}' not found in alphabet file '{path}'")]
    UnknownLanguage { path: PathBuf, lang: String },
}
