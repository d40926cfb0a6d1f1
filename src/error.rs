// src/error.rs

use std::io;
use thiserror::Error;

use crate::api_client::ApiError;
use crate::directory::DirectoryError;
use crate::export::FetchError;
use crate::model::EmployeeId;
use crate::workbook::ExportError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] envy::Error),

    #[error("Missing configuration value: {0}")]
    MissingConfig(String),

    #[error("Payroll API error: {0}")]
    Api(#[from] ApiError),

    #[error("Employee directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("JSON serialization/deserialization failed: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: io::Error,
        context: String,
    },

    #[error("Employee {0} not found")]
    EmployeeNotFound(EmployeeId),
}

pub(crate) fn io_context<S: Into<String>>(source: io::Error, context: S) -> AppError {
    AppError::Io {
        source,
        context: context.into(),
    }
}
