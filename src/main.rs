use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;

mod db;
mod driver;
mod error;
mod models;
mod overdue;
mod report;
mod rules;
mod settings;
mod table;

use crate::models::MeasurementKind;
use crate::rules::{PgRuleStore, RuleLookup};
use crate::settings::Settings;
use crate::table::TableAccessor;

#[derive(Parser)]
#[command(name = "plan-mantto")]
#[command(about = "Flags overdue maintenance measurements per user", long_about = None)]
struct Cli {
    /// Optional TOML settings file; MANTTO_* variables take precedence
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample rules and evaluations
    Seed,
    /// Import evaluations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print one overdue flag per user and metric
    Check {
        /// Evaluation date (YYYY-MM-DD); defaults to the local date
        #[arg(long)]
        today: Option<NaiveDate>,
        #[arg(long)]
        user: Option<i32>,
        /// Query the rule table for every metric instead of caching it
        #[arg(long)]
        no_cache: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Manage repetition rules
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// List configured rules
    List,
    /// Create or replace the interval for a kind and level
    Set {
        #[arg(long, value_enum)]
        kind: MeasurementKind,
        #[arg(long)]
        level: i32,
        #[arg(long)]
        days: i32,
    },
    /// Remove the rule for a kind and level
    Remove {
        #[arg(long, value_enum)]
        kind: MeasurementKind,
        #[arg(long)]
        level: i32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    settings.logging.init();

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.query_timeout())
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let rule_store = PgRuleStore::new(
        pool.clone(),
        &settings.rules_table,
        settings.query_timeout(),
    )?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let table = TableAccessor::new(
                db::evaluations_spec(&settings.evaluations_table)?,
                pool.clone(),
                settings.query_timeout(),
            );
            let summary = db::import_csv(&table, &csv)
                .await
                .with_context(|| format!("failed to import {}", csv.display()))?;
            println!(
                "Imported {} new and {} updated evaluations from {}.",
                summary.inserted,
                summary.updated,
                csv.display()
            );
        }
        Commands::Check {
            today,
            user,
            no_cache,
            format,
        } => {
            let today = today.unwrap_or_else(overdue::local_today);
            let table = db::evaluations_spec(&settings.evaluations_table)?;
            let records =
                db::fetch_records(&pool, &table, user, settings.query_timeout()).await?;

            let cached;
            let rules: &dyn RuleLookup = if no_cache {
                &rule_store
            } else {
                cached = rule_store.load_cache().await?;
                &cached
            };

            let evaluation = driver::evaluate_all(&records, rules, today).await?;
            let output = match format {
                OutputFormat::Text => report::render_text(&evaluation.statuses),
                OutputFormat::Json => report::render_json(&evaluation.statuses)?,
            };
            print!("{output}");
        }
        Commands::Rules { command } => match command {
            RuleCommands::List => {
                let rules = rule_store.list().await?;
                if rules.is_empty() {
                    println!("No repetition rules configured.");
                    return Ok(());
                }
                for rule in rules {
                    let kind = MeasurementKind::from_code(rule.medicion)
                        .map(|kind| kind.label().to_string())
                        .unwrap_or_else(|| format!("medicion {}", rule.medicion));
                    println!(
                        "- #{} {} level {}: every {} days",
                        rule.id, kind, rule.evaluacion, rule.dias_repeticion
                    );
                }
            }
            RuleCommands::Set { kind, level, days } => {
                let id = rule_store.upsert(kind, level, days).await?;
                println!("Rule #{id}: {kind} level {level} every {days} days.");
            }
            RuleCommands::Remove { kind, level } => {
                if rule_store.remove(kind, level).await? {
                    println!("Removed rule for {kind} level {level}.");
                } else {
                    println!("No rule for {kind} level {level}.");
                }
            }
        },
    }

    Ok(())
}
