// src/model.rs

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

pub type EmployeeId = i64;
pub type PeriodId = i64;

/// Largest magnitude accepted for a single hour field.
pub const MAX_ROW_HOURS: i64 = 1_000_000;

// --- Wire Data Structures (as returned by the payroll API) ---

/// Numeric field as it arrives on the wire. The API sends decimal strings
/// ("8.00") but older endpoints emit bare JSON numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireDecimal {
    Text(String),
    Number(serde_json::Number),
}

impl WireDecimal {
    fn raw_text(&self) -> String {
        match self {
            WireDecimal::Text(text) => text.clone(),
            WireDecimal::Number(number) => number.to_string(),
        }
    }

    fn parse(&self) -> Option<Decimal> {
        let text = self.raw_text();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .ok()
            // Magnitudes above MAX_ROW_HOURS count as malformed
            .filter(|value| value.abs() <= Decimal::from(MAX_ROW_HOURS))
    }
}

impl From<&str> for WireDecimal {
    fn from(value: &str) -> Self {
        WireDecimal::Text(value.to_string())
    }
}

/// One daily attendance row exactly as the API delivers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttendanceRecord {
    #[serde(alias = "employee_id")]
    pub employee_id: EmployeeId,
    #[serde(alias = "employee_name")]
    pub employee_name: String,
    pub date: String,
    #[serde(default, alias = "time_in")]
    pub time_in: Option<String>,
    #[serde(default, alias = "time_out")]
    pub time_out: Option<String>,
    #[serde(default, alias = "regular_hours")]
    pub regular_hours: Option<WireDecimal>,
    #[serde(default, alias = "night_hours")]
    pub night_hours: Option<WireDecimal>,
    #[serde(default, alias = "extra_hours")]
    pub extra_hours: Option<WireDecimal>,
    #[serde(default, alias = "lunch_deduction_hours")]
    pub lunch_deduction_hours: Option<WireDecimal>,
}

/// Raised when a numeric field cannot be read as a decimal. Records carrying
/// such values are rejected, never counted as zero.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Malformed {field} value '{value}' for employee {employee_id} on {date}")]
pub struct DataIntegrityError {
    pub employee_id: EmployeeId,
    pub date: String,
    pub field: &'static str,
    pub value: String,
}

impl RawAttendanceRecord {
    fn parse_field(
        &self,
        field: &'static str,
        value: &Option<WireDecimal>,
    ) -> Result<Decimal, DataIntegrityError> {
        let integrity_error = |raw: String| DataIntegrityError {
            employee_id: self.employee_id,
            date: self.date.clone(),
            field,
            value: raw,
        };

        match value {
            Some(wire) => wire.parse().ok_or_else(|| integrity_error(wire.raw_text())),
            None => Err(integrity_error("null".to_string())),
        }
    }

    /// Parses the four hour fields into decimals.
    pub fn validate(&self) -> Result<AttendanceRecord, DataIntegrityError> {
        let hours = HoursBreakdown {
            regular: self.parse_field("regularHours", &self.regular_hours)?,
            night: self.parse_field("nightHours", &self.night_hours)?,
            extra: self.parse_field("extraHours", &self.extra_hours)?,
            lunch_deduction: self
                .parse_field("lunchDeductionHours", &self.lunch_deduction_hours)?,
        };

        Ok(AttendanceRecord {
            employee_id: self.employee_id,
            employee_name: self.employee_name.clone(),
            date: self.date.clone(),
            time_in: non_blank(&self.time_in),
            time_out: non_blank(&self.time_out),
            hours,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Validates a whole fetch. The first malformed record aborts the batch so the
/// caller never aggregates partial totals for an employee without knowing.
pub fn validate_records(
    raw_records: &[RawAttendanceRecord],
) -> Result<Vec<AttendanceRecord>, DataIntegrityError> {
    raw_records
        .iter()
        .map(|raw| {
            raw.validate().map_err(|e| {
                warn!("Rejecting attendance data: {}", e);
                e
            })
        })
        .collect()
}

// --- Validated Attendance Data ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HoursBreakdown {
    pub regular: Decimal,
    pub night: Decimal,
    pub extra: Decimal,
    pub lunch_deduction: Decimal,
}

impl HoursBreakdown {
    /// Paid working time: regular plus night. Extra hours are tracked apart.
    pub fn work_hours(&self) -> Decimal {
        self.regular + self.night
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub date: String,
    pub time_in: Option<String>,
    pub time_out: Option<String>,
    pub hours: HoursBreakdown,
}

impl AttendanceRecord {
    pub fn time_in_display(&self) -> String {
        display_clock(self.time_in.as_deref())
    }

    pub fn time_out_display(&self) -> String {
        display_clock(self.time_out.as_deref())
    }
}

/// "08:30:00" -> "08:30", absent -> "-".
pub fn display_clock(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(clock) => clock.chars().take(5).collect(),
        None => "-".to_string(),
    }
}

// --- Directory Data ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: EmployeeId,
    #[serde(alias = "full_name", alias = "fullName")]
    pub name: String,
    #[serde(default, alias = "document_id")]
    pub document_id: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl Employee {
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayPeriod {
    pub id: PeriodId,
    pub name: String,
    #[serde(default, alias = "start_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, alias = "end_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<String>,
}

impl PayPeriod {
    /// Label used in sheet headers and file names.
    pub fn label(&self) -> &str {
        &self.name
    }
}
