use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::mysql::MySqlPool;
use tracing::warn;

mod applicants;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod notifications;
mod overview;
mod programs;
mod query;
mod report;
mod routes;
mod schedule;
mod schema;
mod server;
mod telemetry;

use config::AppConfig;
use db::MySqlStore;
use models::Program;
use overview::{OverviewBuilder, OverviewFilter};
use query::QueryExecutor;
use report::ReportAssembler;
use schema::SchemaInspector;
use server::ServeArgs;

/// Tables outside the program families that the API reads or writes.
const SHARED_TABLES: [(&str, &[&str]); 6] = [
    ("courses", &["id", "course_code", "course_name"]),
    ("phases", &["id", "course_id", "phase_name", "phase_order", "commitment_fee"]),
    ("user_enrollments", &["user_id", "course_id", "status"]),
    (
        "user_phase_progress",
        &["user_id", "phase_id", "status", "progress_percentage", "updated_at"],
    ),
    (
        "applicants",
        &["applicant_id", "program_applied_for", "application_status", "offer_issued", "fee_paid"],
    ),
    ("schedule_events", &["event_title", "date", "time", "event_type", "program_id"]),
];

#[derive(Parser)]
#[command(name = "admissions-dashboard")]
#[command(about = "Admissions dashboard API and reporting tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Serve(ServeArgs),
    /// Create or upgrade the database schema
    InitDb,
    /// Load deterministic sample data
    Seed,
    /// Upsert applicants from a CSV file
    ImportApplicants {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print one program's dashboard report as JSON
    Report {
        #[arg(long)]
        program: Program,
    },
    /// Print the course/phase overview as JSON
    Overview {
        #[arg(long)]
        course: Option<String>,
        #[arg(long)]
        phase: Option<String>,
    },
    /// Verify the tables and columns the reports depend on
    CheckTables,
}

fn store(config: &AppConfig, pool: &MySqlPool) -> QueryExecutor {
    MySqlStore::new(pool.clone(), config.database.query_timeout).into_executor()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load().context("failed to load configuration")?;
    telemetry::init(&config.telemetry).context("failed to initialise logging")?;

    let pool = db::connect(&config.database).await?;

    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => {
            server::run(config, args, pool.clone())
                .await
                .context("API server failed")?;
        }
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool, &store(&config, &pool)).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportApplicants { csv } => {
            let summary = db::import_csv(&pool, &csv).await?;
            println!(
                "Imported {} new and {} updated applicants from {}.",
                summary.inserted,
                summary.updated,
                csv.display()
            );
        }
        Commands::Report { program } => {
            let assembler = ReportAssembler::new(store(&config, &pool), config.programs.clone());
            let report = assembler.build(program).await;
            if !report.degraded.is_empty() {
                warn!(degraded = ?report.degraded, "report entries fell back to defaults");
            }
            println!("{}", serde_json::to_string_pretty(&report.data)?);
        }
        Commands::Overview { course, phase } => {
            let filter = OverviewFilter {
                course_code: course,
                phase_name: phase,
            };
            let courses = OverviewBuilder::new(store(&config, &pool))
                .overview(&filter)
                .await
                .context("failed to build overview")?;
            println!("{}", serde_json::to_string_pretty(&courses)?);
        }
        Commands::CheckTables => {
            let inspector = SchemaInspector::new(store(&config, &pool));
            let mut required: Vec<(String, Vec<&str>)> = Program::ALL
                .into_iter()
                .flat_map(|program| config.programs.get(program).required_columns())
                .collect();
            required.extend(
                SHARED_TABLES
                    .iter()
                    .map(|(table, columns)| (table.to_string(), columns.to_vec())),
            );

            let mut failing = 0;
            for (table, columns) in &required {
                let check = inspector.check_columns(table, columns).await;
                if !check.exists {
                    failing += 1;
                    println!("MISSING  {table}");
                } else if !check.has_all_columns {
                    failing += 1;
                    println!("PARTIAL  {table}: missing {}", check.missing_columns.join(", "));
                } else {
                    println!("ok       {table}");
                }
            }

            if failing > 0 {
                anyhow::bail!("{failing} of {} tables are missing or incomplete", required.len());
            }
            println!("All {} tables present.", required.len());
        }
    }

    pool.close().await;
    Ok(())
}
