// src/stats.rs

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::model::{AttendanceRecord, EmployeeId};

// --- Per-Employee Statistics ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeStatsSummary {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub total_days: u32,
    pub total_regular_hours: Decimal,
    pub total_night_hours: Decimal,
    pub total_extra_hours: Decimal,
    pub total_lunch_deduction: Decimal,
    /// Regular plus night hours. Extra hours are never folded in.
    pub total_work_hours: Decimal,
    /// Source rows in the order they were folded.
    pub details: Vec<AttendanceRecord>,
}

impl EmployeeStatsSummary {
    fn empty(employee_id: EmployeeId, employee_name: &str) -> Self {
        Self {
            employee_id,
            employee_name: employee_name.to_string(),
            total_days: 0,
            total_regular_hours: Decimal::ZERO,
            total_night_hours: Decimal::ZERO,
            total_extra_hours: Decimal::ZERO,
            total_lunch_deduction: Decimal::ZERO,
            total_work_hours: Decimal::ZERO,
            details: Vec::new(),
        }
    }

    fn fold(&mut self, record: &AttendanceRecord) {
        let hours = &record.hours;
        self.total_days += 1;
        self.total_regular_hours += hours.regular;
        self.total_night_hours += hours.night;
        self.total_extra_hours += hours.extra;
        self.total_lunch_deduction += hours.lunch_deduction;
        self.total_work_hours += hours.work_hours();
        self.details.push(record.clone());
    }
}

/// Summaries keyed by employee, iterated in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsTable {
    summaries: Vec<EmployeeStatsSummary>,
    index: HashMap<EmployeeId, usize>,
}

impl StatsTable {
    pub fn get(&self, employee_id: EmployeeId) -> Option<&EmployeeStatsSummary> {
        self.index.get(&employee_id).map(|&i| &self.summaries[i])
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmployeeStatsSummary> {
        self.summaries.iter()
    }

    pub fn employee_ids(&self) -> Vec<EmployeeId> {
        self.summaries.iter().map(|s| s.employee_id).collect()
    }

    pub fn into_summaries(self) -> Vec<EmployeeStatsSummary> {
        self.summaries
    }

    fn entry(&mut self, employee_id: EmployeeId, employee_name: &str) -> &mut EmployeeStatsSummary {
        let position = match self.index.get(&employee_id) {
            Some(&i) => i,
            None => {
                self.summaries
                    .push(EmployeeStatsSummary::empty(employee_id, employee_name));
                let i = self.summaries.len() - 1;
                self.index.insert(employee_id, i);
                i
            }
        };
        &mut self.summaries[position]
    }
}

impl IntoIterator for StatsTable {
    type Item = EmployeeStatsSummary;
    type IntoIter = std::vec::IntoIter<EmployeeStatsSummary>;

    fn into_iter(self) -> Self::IntoIter {
        self.summaries.into_iter()
    }
}

/// Builds a table from summaries aggregated separately, e.g. one fetch per
/// employee. A repeated employee id keeps the first summary.
impl FromIterator<EmployeeStatsSummary> for StatsTable {
    fn from_iter<I: IntoIterator<Item = EmployeeStatsSummary>>(iter: I) -> Self {
        let mut table = StatsTable::default();
        for summary in iter {
            if table.index.contains_key(&summary.employee_id) {
                debug!("Duplicate summary for employee {} ignored", summary.employee_id);
                continue;
            }
            table.index.insert(summary.employee_id, table.summaries.len());
            table.summaries.push(summary);
        }
        table
    }
}

// --- Aggregation ---

pub struct StatsAggregator;

impl StatsAggregator {
    /// Folds daily rows into one summary per employee. Pure: every call starts
    /// from an empty table.
    pub fn aggregate(records: &[AttendanceRecord]) -> StatsTable {
        let mut table = StatsTable::default();
        for record in records {
            table
                .entry(record.employee_id, &record.employee_name)
                .fold(record);
        }
        debug!(
            "Aggregated {} attendance rows into {} employee summaries",
            records.len(),
            table.len()
        );
        table
    }
}

/// Ranking view: descending total work hours, ties keep first-seen order.
pub fn ranked_by_work_hours(table: &StatsTable) -> Vec<&EmployeeStatsSummary> {
    let mut ranked: Vec<&EmployeeStatsSummary> = table.iter().collect();
    ranked.sort_by(|a, b| b.total_work_hours.cmp(&a.total_work_hours));
    ranked
}

/// Column sums across summaries, used for the TOTALES row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GrandTotals {
    pub total_days: u32,
    pub total_work_hours: Decimal,
    pub total_regular_hours: Decimal,
    pub total_night_hours: Decimal,
    pub total_extra_hours: Decimal,
    pub total_lunch_deduction: Decimal,
}

impl GrandTotals {
    pub fn from_summaries<'a, I>(summaries: I) -> Self
    where
        I: IntoIterator<Item = &'a EmployeeStatsSummary>,
    {
        summaries
            .into_iter()
            .fold(GrandTotals::default(), |mut acc, s| {
                acc.total_days += s.total_days;
                acc.total_work_hours += s.total_work_hours;
                acc.total_regular_hours += s.total_regular_hours;
                acc.total_night_hours += s.total_night_hours;
                acc.total_extra_hours += s.total_extra_hours;
                acc.total_lunch_deduction += s.total_lunch_deduction;
                acc
            })
    }
}
