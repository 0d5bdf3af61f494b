use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use academic_insights::aggregate::build_aggregates;
use academic_insights::improvement::{most_improved, summarize};
use academic_insights::models::Snapshot;
use academic_insights::normalize::normalize_batch;
use academic_insights::report::{build_report, summarize_tiers};
use academic_insights::store::{publish, CsvRecordRepository, RecordRepository};
use academic_insights::{analyze, AnalysisConfig};

#[derive(Parser)]
#[command(name = "academic-insights")]
#[command(
    about = "Score analytics: strength tiers, trends, recommendations and mentors",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis over a CSV of score records
    Analyze {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the JSON report here
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write a markdown summary here
        #[arg(long)]
        report: Option<PathBuf>,
        /// Override the trend slope threshold
        #[arg(long)]
        epsilon: Option<f64>,
        /// Override the number of similar students consulted
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Normalise a CSV and list the rows that would be rejected
    Validate {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Rank students by first-to-last attempt improvement
    Improvement {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Write the default configuration as TOML
    InitConfig {
        #[arg(long, default_value = "academic-insights.toml")]
        out: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AnalysisConfig> {
    let config = match path {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("academic_insights=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            csv,
            config,
            out,
            report,
            epsilon,
            top_k,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(epsilon) = epsilon {
                config.trend.epsilon = epsilon;
            }
            if let Some(top_k) = top_k {
                config.similarity.top_k = top_k;
            }
            config.validate().context("invalid configuration")?;

            let rows = CsvRecordRepository::new(&csv).load()?;
            let snapshot = Snapshot::ingest(&rows, &config.normalize);

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let analysis = analyze(&snapshot, &config, &cancel)
                .await
                .context("analysis failed")?;

            println!(
                "Analysed {} records for {} students ({} rejected).",
                analysis.record_count,
                analysis.tiers.len(),
                analysis.rejected.len()
            );
            for (label, count) in summarize_tiers(&analysis) {
                println!("- {}: {}", label.as_str(), count);
            }
            println!(
                "{} recommendations, {} mentor pairings, {} waitlisted, {} issues.",
                analysis.recommendations.len(),
                analysis.mentor_pairings.len(),
                analysis.unmatched_mentees.len(),
                analysis.issues.len()
            );

            if let Some(out) = out {
                let json = analysis.to_json().context("failed to serialise report")?;
                publish(&out, &json)?;
                println!("JSON report written to {}.", out.display());
            }
            if let Some(path) = report {
                publish(&path, &build_report(&analysis))?;
                println!("Report written to {}.", path.display());
            }
        }
        Commands::Validate { csv, config } => {
            let config = load_config(config.as_ref())?;
            let rows = CsvRecordRepository::new(&csv).load()?;
            let batch = normalize_batch(&rows, &config.normalize);

            println!(
                "{} rows: {} accepted, {} rejected.",
                rows.len(),
                batch.records.len(),
                batch.rejected.len()
            );
            for rejected in &batch.rejected {
                println!("- row {}: {}", rejected.row, rejected.error);
            }
            if !rows.is_empty() && batch.records.is_empty() {
                bail!("every row in {} was rejected", csv.display());
            }
        }
        Commands::Improvement { csv, config, limit } => {
            let config = load_config(config.as_ref())?;
            config.validate().context("invalid configuration")?;
            let rows = CsvRecordRepository::new(&csv).load()?;
            let batch = normalize_batch(&rows, &config.normalize);
            let summaries = summarize(
                &build_aggregates(&batch.records),
                config.trend.improvement_band,
            );
            let ranked = most_improved(&summaries, limit);

            if ranked.is_empty() {
                println!("No students with repeat attempts.");
                return Ok(());
            }

            println!("Most improved students:");
            for summary in ranked {
                println!(
                    "- {} average {:+.1} points ({} improved, {} declined, {:?})",
                    summary.student_id,
                    summary.average_improvement,
                    summary.courses_improved,
                    summary.courses_declined,
                    summary.overall
                );
            }
        }
        Commands::InitConfig { out } => {
            let toml = AnalysisConfig::default().to_toml()?;
            publish(&out, &toml)?;
            println!("Default configuration written to {}.", out.display());
        }
    }

    Ok(())
}
