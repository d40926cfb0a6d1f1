// src/export.rs

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api_client::{ApiError, AttendanceSource, Envelope};
use crate::error::{self, AppError};
use crate::model::{
    validate_records, AttendanceRecord, DataIntegrityError, Employee, EmployeeId, PayPeriod,
    PeriodId, RawAttendanceRecord,
};
use crate::stats::{EmployeeStatsSummary, StatsAggregator, StatsTable};
use crate::workbook::{self, io_context, ExportError, WorkbookBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

/// Why one employee's data could not be used.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("attendance fetch failed: {0}")]
    Api(#[from] ApiError),

    #[error("attendance data rejected: {0}")]
    Integrity(#[from] DataIntegrityError),
}

#[derive(Debug)]
pub struct FetchFailure {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub error: FetchError,
}

/// Result of the sequential per-employee fetch loop.
#[derive(Debug, Default)]
pub struct BulkFetch {
    pub table: StatsTable,
    pub failures: Vec<FetchFailure>,
}

impl BulkFetch {
    pub fn skipped_ids(&self) -> Vec<EmployeeId> {
        self.failures.iter().map(|f| f.employee_id).collect()
    }
}

#[derive(Debug)]
pub enum ExportOutcome {
    Written {
        path: PathBuf,
        employees: usize,
        skipped: Vec<FetchFailure>,
    },
    /// No attendance rows for anyone who could be fetched. Not an error.
    NothingToExport { skipped: Vec<FetchFailure> },
}

impl ExportOutcome {
    pub fn skipped(&self) -> &[FetchFailure] {
        match self {
            ExportOutcome::Written { skipped, .. } => skipped,
            ExportOutcome::NothingToExport { skipped } => skipped,
        }
    }
}

pub struct ExportService<S> {
    source: S,
    output_dir: PathBuf,
    generated_at: Option<NaiveDateTime>,
}

impl<S: AttendanceSource> ExportService<S> {
    pub fn new(source: S, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            output_dir: output_dir.into(),
            generated_at: None,
        }
    }

    /// Pins the "Generado" timestamp instead of reading the clock.
    pub fn with_generated_at(mut self, generated_at: NaiveDateTime) -> Self {
        self.generated_at = Some(generated_at);
        self
    }

    fn builder(&self, period_label: &str) -> WorkbookBuilder {
        let generated_at = self
            .generated_at
            .unwrap_or_else(|| Local::now().naive_local());
        WorkbookBuilder::new(period_label, generated_at)
    }

    /// Fetches and validates one employee's rows for a period.
    pub async fn fetch_employee_records(
        &self,
        employee_id: EmployeeId,
        period_id: PeriodId,
    ) -> Result<Vec<AttendanceRecord>, FetchError> {
        let raw = self.source.attendance_history(employee_id, period_id).await?;
        Ok(validate_records(&raw)?)
    }

    /// `None` when the employee has no rows in the period.
    pub async fn fetch_employee_summary(
        &self,
        employee: &Employee,
        period_id: PeriodId,
    ) -> Result<Option<EmployeeStatsSummary>, FetchError> {
        let records = self.fetch_employee_records(employee.id, period_id).await?;
        let table = StatsAggregator::aggregate(&records);
        if table.len() > 1 {
            debug!(
                "Fetch for employee {} returned rows for {} employees; keeping own rows",
                employee.id,
                table.len()
            );
        }
        Ok(table
            .into_iter()
            .find(|summary| summary.employee_id == employee.id))
    }

    /// One fetch per employee, awaited in order. Each result lands either in
    /// the table or in the failure list; a failure never aborts the loop.
    pub async fn collect_summaries(&self, employees: &[Employee], period_id: PeriodId) -> BulkFetch {
        let mut summaries = Vec::with_capacity(employees.len());
        let mut failures = Vec::new();

        for employee in employees {
            match self.fetch_employee_summary(employee, period_id).await {
                Ok(Some(summary)) => summaries.push(summary),
                Ok(None) => debug!("Employee {} has no rows in period {}", employee.id, period_id),
                Err(error) => {
                    warn!(
                        "Skipping employee {} ({}) for period {}: {}",
                        employee.id, employee.name, period_id, error
                    );
                    failures.push(FetchFailure {
                        employee_id: employee.id,
                        employee_name: employee.name.clone(),
                        error,
                    });
                }
            }
        }

        if !failures.is_empty() {
            warn!(
                "{} of {} employees skipped for period {}",
                failures.len(),
                employees.len(),
                period_id
            );
        }

        BulkFetch {
            table: summaries.into_iter().collect(),
            failures,
        }
    }

    /// Single-employee workbook. A failed fetch is an error here since there
    /// is nobody else to fall back on.
    pub async fn export_employee(
        &self,
        employee: &Employee,
        period: &PayPeriod,
    ) -> Result<ExportOutcome, AppError> {
        let summary = match self.fetch_employee_summary(employee, period.id).await? {
            Some(summary) => summary,
            None => {
                info!(
                    "Nothing to export for employee {} in '{}'",
                    employee.id,
                    period.label()
                );
                return Ok(ExportOutcome::NothingToExport {
                    skipped: Vec::new(),
                });
            }
        };

        let layout = self.builder(period.label()).employee_workbook(&summary)?;
        let path = self.output_dir.join(&layout.file_name);
        layout.save(&path)?;

        Ok(ExportOutcome::Written {
            path,
            employees: 1,
            skipped: Vec::new(),
        })
    }

    /// All-employee export in the requested format.
    pub async fn export_period(
        &self,
        employees: &[Employee],
        period: &PayPeriod,
        format: ExportFormat,
    ) -> Result<ExportOutcome, AppError> {
        info!(
            "Exporting period '{}' for {} employees",
            period.label(),
            employees.len()
        );
        let bulk = self.collect_summaries(employees, period.id).await;
        self.write_period_export(bulk.table, bulk.failures, period.label(), format)
    }

    fn write_period_export(
        &self,
        table: StatsTable,
        skipped: Vec<FetchFailure>,
        period_label: &str,
        format: ExportFormat,
    ) -> Result<ExportOutcome, AppError> {
        if table.is_empty() {
            info!("Nothing to export for '{}'", period_label);
            return Ok(ExportOutcome::NothingToExport { skipped });
        }

        let summaries = table.into_summaries();
        let path = match format {
            ExportFormat::Xlsx => {
                let layout = self.builder(period_label).period_workbook(&summaries)?;
                let path = self.output_dir.join(&layout.file_name);
                layout.save(&path)?;
                path
            }
            ExportFormat::Csv => {
                let path = self
                    .output_dir
                    .join(workbook::period_file_name(period_label))
                    .with_extension("csv");
                write_csv_file(&summaries, &path)?;
                path
            }
        };

        Ok(ExportOutcome::Written {
            path,
            employees: summaries.len(),
            skipped,
        })
    }
}

fn write_csv_file(
    summaries: &[EmployeeStatsSummary],
    path: &Path,
) -> Result<(), ExportError> {
    let mut buffer = Vec::new();
    workbook::write_summary_csv(summaries, &mut buffer)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                io_context(e, format!("Failed to create output directory: {:?}", parent))
            })?;
        }
    }
    fs::write(path, buffer)
        .map_err(|e| io_context(e, format!("Failed to write CSV: {:?}", path)))?;
    info!("Saved CSV summary to {:?}", path);
    Ok(())
}

// --- Offline Source ---

/// Attendance rows loaded from a JSON dump of the history endpoint. The file
/// covers a single period, so the period id is ignored on lookup.
#[derive(Debug, Clone, Default)]
pub struct JsonFileSource {
    records: Vec<RawAttendanceRecord>,
}

impl JsonFileSource {
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let bytes = fs::read(path)
            .map_err(|e| error::io_context(e, format!("Failed to read attendance file: {:?}", path)))?;
        let source = Self::from_slice(&bytes)?;
        info!("Loaded {} attendance rows from {:?}", source.len(), path);
        Ok(source)
    }

    /// Accepts a bare array or one wrapped in `{"data": [...]}`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let records = serde_json::from_slice::<Envelope<Vec<RawAttendanceRecord>>>(bytes)?
            .into_inner();
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct employees in file order.
    pub fn employees(&self) -> Vec<Employee> {
        let mut employees: Vec<Employee> = Vec::new();
        for record in &self.records {
            if employees.iter().any(|e| e.id == record.employee_id) {
                continue;
            }
            employees.push(Employee {
                id: record.employee_id,
                name: record.employee_name.clone(),
                document_id: None,
                active: None,
            });
        }
        employees
    }
}

#[async_trait]
impl AttendanceSource for JsonFileSource {
    async fn attendance_history(
        &self,
        employee_id: EmployeeId,
        _period_id: PeriodId,
    ) -> Result<Vec<RawAttendanceRecord>, ApiError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.employee_id == employee_id)
            .cloned()
            .collect())
    }
}
