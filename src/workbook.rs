// src/workbook.rs

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::stats::{EmployeeStatsSummary, GrandTotals};

// Constants
pub const SHEET_NAME_MAX_LEN: usize = 31;
pub const SUMMARY_SHEET_NAME: &str = "Resumen";
pub const SUMMARY_COLUMNS: u16 = 6;
pub const EMPLOYEE_SHEET_COLUMNS: u16 = 6;
pub const PERIOD_DETAIL_COLUMNS: u16 = 7;
pub const TOTALS_LABEL: &str = "TOTALES";
const GENERATED_AT_FORMAT: &str = "%d/%m/%Y %H:%M";

static INVALID_SHEET_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\\/*?:\[\]]").expect("static sheet-name pattern"));
static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("static whitespace pattern"));

const SUMMARY_HEADERS: [&str; 6] = [
    "Empleado",
    "Días Trabajados",
    "Horas Trabajadas",
    "Horas Nocturnas",
    "Horas Extra",
    "Descuento Almuerzo",
];

const PERIOD_DETAIL_HEADERS: [&str; 7] = [
    "Fecha",
    "Entrada",
    "Salida",
    "Horas Normales",
    "Horas Nocturnas",
    "Horas Extra",
    "Descuento Almuerzo",
];

const EMPLOYEE_DETAIL_HEADERS: [&str; 6] = [
    "Fecha",
    "Entrada",
    "Salida",
    "Horas Trabajadas",
    "Horas Extra",
    "Descuento Almuerzo",
];

// --- Error Type ---

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Nothing to export: no attendance data for the selected period")]
    NothingToExport,

    #[error("Spreadsheet generation failed: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("CSV writing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: io::Error,
        context: String,
    },
}

// Helper to create context-aware IO errors
pub(crate) fn io_context<S: Into<String>>(source: io::Error, context: S) -> ExportError {
    ExportError::Io {
        source,
        context: context.into(),
    }
}

// --- Layout Structures ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStyle {
    Title,
    Meta,
    ColumnHeader,
    Label,
    Data,
    Total,
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub style: RowStyle,
    pub cells: Vec<String>,
    /// A merged row holds a single cell spanning every column of the sheet.
    pub merged: bool,
}

impl SheetRow {
    fn merged(style: RowStyle, text: impl Into<String>) -> Self {
        Self {
            style,
            cells: vec![text.into()],
            merged: true,
        }
    }

    fn cells(style: RowStyle, cells: Vec<String>) -> Self {
        Self {
            style,
            cells,
            merged: false,
        }
    }

    fn blank() -> Self {
        Self {
            style: RowStyle::Blank,
            cells: Vec::new(),
            merged: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRange {
    pub row: u32,
    pub first_col: u16,
    pub last_col: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetLayout {
    pub name: String,
    pub columns: u16,
    pub rows: Vec<SheetRow>,
}

impl SheetLayout {
    pub fn merges(&self) -> Vec<MergeRange> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.merged)
            .map(|(i, _)| MergeRange {
                row: i as u32,
                first_col: 0,
                last_col: self.columns - 1,
            })
            .collect()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.cells.get(col))
            .map(String::as_str)
    }

    pub fn rows_with_style(&self, style: RowStyle) -> impl Iterator<Item = &SheetRow> {
        self.rows.iter().filter(move |r| r.style == style)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkbookLayout {
    pub file_name: String,
    pub sheets: Vec<SheetLayout>,
}

impl WorkbookLayout {
    pub fn sheet(&self, name: &str) -> Option<&SheetLayout> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Renders the whole workbook in memory. Nothing touches disk here, so a
    /// failure cannot leave a half-written file behind.
    pub fn to_xlsx_bytes(&self) -> Result<Vec<u8>, ExportError> {
        let mut workbook = Workbook::new();
        let formats = SheetFormats::new();

        for sheet in &self.sheets {
            let worksheet = workbook.add_worksheet();
            write_sheet(worksheet, sheet, &formats)?;
        }

        let buffer = workbook.save_to_buffer()?;
        debug!(
            "Rendered workbook '{}' ({} sheets, {} bytes)",
            self.file_name,
            self.sheets.len(),
            buffer.len()
        );
        Ok(buffer)
    }

    pub fn save(&self, path: &Path) -> Result<(), ExportError> {
        let bytes = self.to_xlsx_bytes()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    io_context(e, format!("Failed to create output directory: {:?}", parent))
                })?;
            }
        }
        fs::write(path, bytes)
            .map_err(|e| io_context(e, format!("Failed to write workbook: {:?}", path)))?;

        info!("Saved workbook to {:?}", path);
        Ok(())
    }
}

// --- XLSX Rendering ---

struct SheetFormats {
    title: Format,
    meta: Format,
    column_header: Format,
    label: Format,
    data: Format,
    total: Format,
}

impl SheetFormats {
    fn new() -> Self {
        Self {
            title: Format::new()
                .set_bold()
                .set_font_size(14)
                .set_align(FormatAlign::Center),
            meta: Format::new().set_align(FormatAlign::Left),
            column_header: Format::new()
                .set_bold()
                .set_align(FormatAlign::Center)
                .set_background_color(Color::RGB(0x4472C4))
                .set_font_color(Color::White)
                .set_border(FormatBorder::Thin),
            label: Format::new().set_bold().set_border(FormatBorder::Thin),
            data: Format::new().set_border(FormatBorder::Thin),
            total: Format::new()
                .set_bold()
                .set_background_color(Color::RGB(0xE2EFDA))
                .set_border(FormatBorder::Thin),
        }
    }

    fn for_style(&self, style: RowStyle) -> &Format {
        match style {
            RowStyle::Title => &self.title,
            RowStyle::Meta => &self.meta,
            RowStyle::ColumnHeader => &self.column_header,
            RowStyle::Label => &self.label,
            RowStyle::Data | RowStyle::Blank => &self.data,
            RowStyle::Total => &self.total,
        }
    }
}

fn write_sheet(
    worksheet: &mut Worksheet,
    sheet: &SheetLayout,
    formats: &SheetFormats,
) -> Result<(), ExportError> {
    worksheet.set_name(&sheet.name)?;

    worksheet.set_column_width(0, 28)?;
    for col in 1..sheet.columns {
        worksheet.set_column_width(col, 18)?;
    }

    for (index, row) in sheet.rows.iter().enumerate() {
        let row_num = index as u32;
        if row.style == RowStyle::Blank {
            continue;
        }
        let format = formats.for_style(row.style);

        if row.merged {
            let text = row.cells.first().map(String::as_str).unwrap_or_default();
            worksheet.merge_range(row_num, 0, row_num, sheet.columns - 1, text, format)?;
            continue;
        }

        for (col, text) in row.cells.iter().enumerate() {
            worksheet.write_string_with_format(row_num, col as u16, text, format)?;
        }
    }
    Ok(())
}

// --- Formatting Helpers ---

/// Two decimals, half away from zero: 1.005 -> "1.01", 8 -> "8.00".
pub fn format_hours(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    rounded.to_string()
}

/// Strips characters spreadsheets forbid in tab names and keeps the first 31
/// of what remains. Whitespace counts as a valid character and is kept.
/// Apostrophes are trimmed from both ends after the cut, since the cut itself
/// can leave one at the end. Blank results come back empty.
pub fn sanitize_sheet_name(name: &str) -> String {
    let stripped = INVALID_SHEET_CHARS.replace_all(name, "");
    let cut: String = stripped.chars().take(SHEET_NAME_MAX_LEN).collect();
    let trimmed = cut.trim_matches('\'');
    if trimmed.trim().is_empty() {
        return String::new();
    }
    trimmed.to_string()
}

/// Hands out unique sheet names; comparison is case-insensitive like Excel's.
#[derive(Debug, Default)]
pub struct SheetNamer {
    taken: HashSet<String>,
}

impl SheetNamer {
    /// `base` never starts with an apostrophe and every suffixed name ends
    /// in ')', so each returned name is accepted by the writer.
    pub fn claim(&mut self, wanted: &str, fallback: &str) -> String {
        let mut base = sanitize_sheet_name(wanted);
        if base.is_empty() {
            base = sanitize_sheet_name(fallback);
        }

        if self.taken.insert(base.to_lowercase()) {
            return base;
        }

        let mut n = 2;
        loop {
            let suffix = format!(" ({})", n);
            let keep = SHEET_NAME_MAX_LEN - suffix.chars().count();
            let prefix: String = base.chars().take(keep).collect();
            let prefix = prefix.trim_end_matches(|c: char| c.is_whitespace() || c == '\'');
            let candidate = format!("{}{}", prefix, suffix);
            if self.taken.insert(candidate.to_lowercase()) {
                debug!("Sheet name '{}' already used, renamed to '{}'", base, candidate);
                return candidate;
            }
            n += 1;
        }
    }
}

fn underscored(text: &str) -> String {
    let joined = WHITESPACE_RUN.replace_all(text.trim(), "_");
    // Path separators cannot appear in a file name
    joined.replace(['/', '\\'], "-")
}

/// `Asistencia_<employee>_<period>.xlsx`
pub fn employee_file_name(employee_name: &str, period_label: &str) -> String {
    format!(
        "Asistencia_{}_{}.xlsx",
        underscored(employee_name),
        underscored(period_label)
    )
}

/// `Asistencia_Completa_<period>.xlsx`
pub fn period_file_name(period_label: &str) -> String {
    format!("Asistencia_Completa_{}.xlsx", underscored(period_label))
}

// --- Workbook Builder ---

pub struct WorkbookBuilder {
    period_label: String,
    generated_at: NaiveDateTime,
}

impl WorkbookBuilder {
    pub fn new(period_label: impl Into<String>, generated_at: NaiveDateTime) -> Self {
        Self {
            period_label: period_label.into(),
            generated_at,
        }
    }

    fn generated_line(&self) -> String {
        format!("Generado: {}", self.generated_at.format(GENERATED_AT_FORMAT))
    }

    fn period_line(&self) -> String {
        format!("Período: {}", self.period_label)
    }

    /// All-employee workbook: a summary sheet followed by one detail sheet per
    /// employee, in input order.
    pub fn period_workbook(
        &self,
        summaries: &[EmployeeStatsSummary],
    ) -> Result<WorkbookLayout, ExportError> {
        if summaries.is_empty() {
            return Err(ExportError::NothingToExport);
        }

        let mut namer = SheetNamer::default();
        let mut sheets = Vec::with_capacity(summaries.len() + 1);
        sheets.push(self.summary_sheet(namer.claim(SUMMARY_SHEET_NAME, SUMMARY_SHEET_NAME), summaries));

        for summary in summaries {
            let name = namer.claim(
                &summary.employee_name,
                &format!("Empleado {}", summary.employee_id),
            );
            sheets.push(self.period_detail_sheet(name, summary));
        }

        info!(
            "Built period workbook for '{}' with {} employee sheets",
            self.period_label,
            summaries.len()
        );
        Ok(WorkbookLayout {
            file_name: period_file_name(&self.period_label),
            sheets,
        })
    }

    /// Single-employee workbook with one sheet.
    pub fn employee_workbook(
        &self,
        summary: &EmployeeStatsSummary,
    ) -> Result<WorkbookLayout, ExportError> {
        if summary.details.is_empty() {
            return Err(ExportError::NothingToExport);
        }

        let mut namer = SheetNamer::default();
        let name = namer.claim(
            &summary.employee_name,
            &format!("Empleado {}", summary.employee_id),
        );

        let mut rows = vec![
            SheetRow::merged(RowStyle::Title, "Reporte de Asistencia"),
            SheetRow::merged(RowStyle::Meta, format!("Empleado: {}", summary.employee_name)),
            SheetRow::merged(RowStyle::Meta, self.period_line()),
            SheetRow::merged(RowStyle::Meta, self.generated_line()),
            SheetRow::blank(),
        ];
        rows.extend(totals_block(summary));
        rows.push(SheetRow::blank());
        rows.push(header_row(&EMPLOYEE_DETAIL_HEADERS));
        rows.extend(summary.details.iter().map(|record| {
            SheetRow::cells(
                RowStyle::Data,
                vec![
                    record.date.clone(),
                    record.time_in_display(),
                    record.time_out_display(),
                    format_hours(record.hours.work_hours()),
                    format_hours(record.hours.extra),
                    format_hours(record.hours.lunch_deduction),
                ],
            )
        }));

        Ok(WorkbookLayout {
            file_name: employee_file_name(&summary.employee_name, &self.period_label),
            sheets: vec![SheetLayout {
                name,
                columns: EMPLOYEE_SHEET_COLUMNS,
                rows,
            }],
        })
    }

    fn summary_sheet(&self, name: String, summaries: &[EmployeeStatsSummary]) -> SheetLayout {
        let mut rows = vec![
            SheetRow::merged(RowStyle::Title, "Reporte de Asistencia"),
            SheetRow::merged(RowStyle::Meta, self.period_line()),
            SheetRow::merged(RowStyle::Meta, self.generated_line()),
            SheetRow::blank(),
        ];
        rows.extend(summary_table_rows(summaries));

        SheetLayout {
            name,
            columns: SUMMARY_COLUMNS,
            rows,
        }
    }

    fn period_detail_sheet(&self, name: String, summary: &EmployeeStatsSummary) -> SheetLayout {
        let mut rows = vec![
            SheetRow::merged(RowStyle::Title, "Detalle de Asistencia"),
            SheetRow::merged(RowStyle::Meta, format!("Empleado: {}", summary.employee_name)),
            SheetRow::merged(RowStyle::Meta, self.period_line()),
            SheetRow::merged(RowStyle::Meta, self.generated_line()),
            SheetRow::blank(),
        ];
        rows.extend(totals_block(summary));
        rows.push(SheetRow::blank());
        rows.push(header_row(&PERIOD_DETAIL_HEADERS));
        rows.extend(summary.details.iter().map(|record| {
            SheetRow::cells(
                RowStyle::Data,
                vec![
                    record.date.clone(),
                    record.time_in_display(),
                    record.time_out_display(),
                    format_hours(record.hours.regular),
                    format_hours(record.hours.night),
                    format_hours(record.hours.extra),
                    format_hours(record.hours.lunch_deduction),
                ],
            )
        }));

        SheetLayout {
            name,
            columns: PERIOD_DETAIL_COLUMNS,
            rows,
        }
    }
}

fn header_row(headers: &[&str]) -> SheetRow {
    SheetRow::cells(
        RowStyle::ColumnHeader,
        headers.iter().map(|h| h.to_string()).collect(),
    )
}

fn totals_block(summary: &EmployeeStatsSummary) -> Vec<SheetRow> {
    let pair = |label: &str, value: String| {
        SheetRow::cells(RowStyle::Label, vec![label.to_string(), value])
    };
    vec![
        pair("Días Trabajados", summary.total_days.to_string()),
        pair("Horas Trabajadas", format_hours(summary.total_work_hours)),
        pair("Horas Nocturnas", format_hours(summary.total_night_hours)),
        pair("Horas Extra", format_hours(summary.total_extra_hours)),
        pair("Descuento Almuerzo", format_hours(summary.total_lunch_deduction)),
    ]
}

/// Column header, one row per employee and the TOTALES row. Shared by the
/// summary sheet and the CSV export.
fn summary_table_rows(summaries: &[EmployeeStatsSummary]) -> Vec<SheetRow> {
    let mut rows = Vec::with_capacity(summaries.len() + 2);
    rows.push(header_row(&SUMMARY_HEADERS));

    for summary in summaries {
        rows.push(SheetRow::cells(
            RowStyle::Data,
            vec![
                summary.employee_name.clone(),
                summary.total_days.to_string(),
                format_hours(summary.total_work_hours),
                format_hours(summary.total_night_hours),
                format_hours(summary.total_extra_hours),
                format_hours(summary.total_lunch_deduction),
            ],
        ));
    }

    let totals = GrandTotals::from_summaries(summaries);
    rows.push(SheetRow::cells(
        RowStyle::Total,
        vec![
            TOTALS_LABEL.to_string(),
            totals.total_days.to_string(),
            format_hours(totals.total_work_hours),
            format_hours(totals.total_night_hours),
            format_hours(totals.total_extra_hours),
            format_hours(totals.total_lunch_deduction),
        ],
    ));
    rows
}

/// Writes the summary table (header, employees, TOTALES) as CSV.
pub fn write_summary_csv<W: io::Write>(
    summaries: &[EmployeeStatsSummary],
    writer: W,
) -> Result<(), ExportError> {
    if summaries.is_empty() {
        return Err(ExportError::NothingToExport);
    }

    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in summary_table_rows(summaries) {
        csv_writer.write_record(&row.cells)?;
    }
    csv_writer
        .flush()
        .map_err(|e| io_context(e, "Failed to flush CSV output"))?;
    Ok(())
}
