// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use asistencia_core::api_client::{ApiClient, EmployeeSource};
use asistencia_core::config::Config;
use asistencia_core::directory::EmployeeDirectory;
use asistencia_core::export::{ExportFormat, ExportOutcome, ExportService, JsonFileSource};
use asistencia_core::model::{Employee, EmployeeId, PayPeriod, PeriodId};
use asistencia_core::stats::{ranked_by_work_hours, GrandTotals, StatsTable};
use asistencia_core::workbook::format_hours;
use asistencia_core::AppError;

#[derive(Parser, Debug)]
#[command(name = "asistencia", version, about = "Attendance statistics and XLSX exports")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Overrides ASISTENCIA_OUTPUT_DIR
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List employees from the directory cache
    Employees {
        /// Ignore the cache and refetch
        #[arg(long)]
        refresh: bool,
    },
    /// List pay periods
    Periods,
    /// Print per-employee totals for a period, ranked by worked hours
    Summary {
        #[arg(long)]
        period: PeriodId,
        #[arg(long)]
        employee: Option<EmployeeId>,
    },
    /// Export one employee's attendance workbook
    Export {
        #[arg(long)]
        period: PeriodId,
        #[arg(long)]
        employee: EmployeeId,
    },
    /// Export every active employee for a period
    ExportAll {
        #[arg(long)]
        period: PeriodId,
        #[arg(long, value_enum, default_value = "xlsx")]
        format: ExportFormat,
    },
    /// Export from a JSON dump of attendance history, without the API
    ExportFile {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        period_label: String,
        #[arg(long)]
        employee: Option<EmployeeId>,
        #[arg(long, value_enum, default_value = "xlsx")]
        format: ExportFormat,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(dir) = cli.output_dir.clone() {
        config.output_dir = dir;
    }
    info!("Configuration loaded. Output directory: {:?}", config.output_dir);

    match cli.command {
        Command::Employees { refresh } => {
            let (_, directory) = connect(&config)?;
            let employees = if refresh {
                directory.refresh().await?
            } else {
                directory.employees().await?
            };
            for employee in &employees {
                let status = if employee.is_active() { "" } else { " (inactivo)" };
                println!("{:>6}  {}{}", employee.id, employee.name, status);
            }
            println!("{} employees", employees.len());
        }
        Command::Periods => {
            let (client, _) = connect(&config)?;
            for period in client.get_periods().await? {
                println!(
                    "{:>6}  {}  {}",
                    period.id,
                    period.name,
                    period.status.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Summary { period, employee } => {
            let (client, directory) = connect(&config)?;
            let period = client.get_period(period).await?;
            let employees = match employee {
                Some(id) => vec![find_employee(&directory, id).await?],
                None => active_employees(directory.employees().await?),
            };
            let service = ExportService::new(client, config.output_dir.clone());
            let bulk = service.collect_summaries(&employees, period.id).await;
            print_summary(&period, &bulk.table);
            for failure in &bulk.failures {
                warn!(
                    "Employee {} ({}) left out: {}",
                    failure.employee_id, failure.employee_name, failure.error
                );
            }
        }
        Command::Export { period, employee } => {
            let (client, directory) = connect(&config)?;
            let period = client.get_period(period).await?;
            let employee = find_employee(&directory, employee).await?;
            let service = ExportService::new(client, config.output_dir.clone());
            let outcome = service
                .export_employee(&employee, &period)
                .await
                .with_context(|| format!("Export failed for employee {}", employee.id))?;
            report(outcome);
        }
        Command::ExportAll { period, format } => {
            let (client, directory) = connect(&config)?;
            let period = client.get_period(period).await?;
            let employees = active_employees(directory.employees().await?);
            let service = ExportService::new(client, config.output_dir.clone());
            let outcome = service.export_period(&employees, &period, format).await?;
            report(outcome);
        }
        Command::ExportFile {
            input,
            period_label,
            employee,
            format,
        } => export_file(&config, &input, &period_label, employee, format).await?,
    }
    Ok(())
}

/// API client plus the cached directory in front of it.
fn connect(config: &Config) -> Result<(ApiClient, EmployeeDirectory<ApiClient>)> {
    let client = ApiClient::new(config.api_config()?)
        .context("Failed to create payroll API client")?;
    let directory = EmployeeDirectory::new(
        client.clone(),
        client.base_url().to_string(),
        config.cache_dir.clone(),
        config.cache_duration_secs,
    );
    Ok((client, directory))
}

async fn export_file(
    config: &Config,
    input: &Path,
    period_label: &str,
    employee: Option<EmployeeId>,
    format: ExportFormat,
) -> Result<()> {
    let source = JsonFileSource::from_path(input)?;
    let employees = source.employees();
    let period = PayPeriod {
        id: 0,
        name: period_label.to_string(),
        start_date: None,
        end_date: None,
        status: None,
    };
    let service = ExportService::new(source, config.output_dir.clone());

    let outcome = match employee {
        Some(id) => {
            let employee = employees
                .into_iter()
                .find(|e| e.id == id)
                .ok_or(AppError::EmployeeNotFound(id))?;
            service.export_employee(&employee, &period).await?
        }
        None => service.export_period(&employees, &period, format).await?,
    };
    report(outcome);
    Ok(())
}

async fn find_employee<S>(directory: &EmployeeDirectory<S>, id: EmployeeId) -> Result<Employee>
where
    S: EmployeeSource,
{
    match directory.find(id).await? {
        Some(employee) => Ok(employee),
        None => Err(AppError::EmployeeNotFound(id).into()),
    }
}

fn active_employees(employees: Vec<Employee>) -> Vec<Employee> {
    employees.into_iter().filter(Employee::is_active).collect()
}

fn print_summary(period: &PayPeriod, table: &StatsTable) {
    println!("Período: {}", period.label());
    if table.is_empty() {
        println!("Sin registros de asistencia");
        return;
    }
    println!(
        "{:<32} {:>5} {:>10} {:>10} {:>10} {:>10}",
        "Empleado", "Días", "Trabajadas", "Nocturnas", "Extra", "Almuerzo"
    );
    for summary in ranked_by_work_hours(table) {
        println!(
            "{:<32} {:>5} {:>10} {:>10} {:>10} {:>10}",
            summary.employee_name,
            summary.total_days,
            format_hours(summary.total_work_hours),
            format_hours(summary.total_night_hours),
            format_hours(summary.total_extra_hours),
            format_hours(summary.total_lunch_deduction)
        );
    }
    let totals = GrandTotals::from_summaries(table.iter());
    println!(
        "{:<32} {:>5} {:>10} {:>10} {:>10} {:>10}",
        "TOTALES",
        totals.total_days,
        format_hours(totals.total_work_hours),
        format_hours(totals.total_night_hours),
        format_hours(totals.total_extra_hours),
        format_hours(totals.total_lunch_deduction)
    );
}

fn report(outcome: ExportOutcome) {
    for failure in outcome.skipped() {
        warn!(
            "Employee {} ({}) skipped: {}",
            failure.employee_id, failure.employee_name, failure.error
        );
    }
    match outcome {
        ExportOutcome::Written {
            path, employees, ..
        } => {
            println!("Exported {} employee(s) to {}", employees, path.display());
        }
        ExportOutcome::NothingToExport { .. } => {
            warn!("Nothing to export: no attendance data for the selected period");
        }
    }
}
