use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use acl_consolidator::config::{Config, JoinSource};
use acl_consolidator::logging;
use acl_consolidator::pipeline::processing::DuplicateKeyPolicy;
use acl_consolidator::pipeline::{self, Pipeline, StageReport, StageStatus};

#[derive(Parser)]
#[command(name = "acl_consolidator")]
#[command(about = "Normalize and consolidate exported shared drive ACL tables")]
#[command(version = "0.1.0")]
struct Cli {
    /// Directory for rolling JSON log files
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flatten the wide permissions export into one grant per row
    Normalize {
        /// Drive registry with id, name, createdTime
        #[arg(long, default_value = "TeamDrives.csv")]
        drives: PathBuf,
        /// Wide export with permissions.N.emailAddress/role/type columns
        #[arg(long, default_value = "TeamDriveACLs.csv")]
        permissions: PathBuf,
        #[arg(long, default_value = "NormalizedTeamDriveACLs.csv")]
        output: PathBuf,
    },
    /// Left-join drive metadata tables on id
    Merge {
        #[arg(long)]
        primary: PathBuf,
        /// Secondary table as label=path; repeat in join order
        #[arg(long = "secondary", value_parser = parse_join_source)]
        secondaries: Vec<JoinSource>,
        #[arg(long)]
        output: PathBuf,
        /// Use the first row per id instead of rejecting repeated ids
        #[arg(long)]
        first_match: bool,
    },
    /// Remove duplicate organizer grants, keeping the first per drive and email
    DedupOrganizers {
        #[arg(long, default_value = "NormalizedTeamDriveACLs.csv")]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Keep only grants held by suspended accounts
    Suspended {
        #[arg(long)]
        grants: PathBuf,
        /// Suspended users export with a primaryEmail column
        #[arg(long)]
        suspended: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Run every stage as configured
    Run {
        /// TOML config; defaults to $ACL_CONFIG, then ./acl.toml
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the run summary as JSON to this path
        #[arg(long)]
        summary: Option<PathBuf>,
    },
}

fn parse_join_source(raw: &str) -> Result<JoinSource, String> {
    match raw.split_once('=') {
        Some((label, path)) if !label.trim().is_empty() && !path.trim().is_empty() => {
            Ok(JoinSource::new(label.trim(), path.trim()))
        }
        _ => Err(format!("expected label=path, got '{raw}'")),
    }
}

fn print_stage(report: &StageReport) {
    match report.status {
        StageStatus::Succeeded => println!(
            "✅ {}: {} rows -> {}",
            report.stage,
            report.rows_out,
            report.output.as_deref().unwrap_or("-")
        ),
        StageStatus::Failed => println!(
            "❌ {}: {}",
            report.stage,
            report.message.as_deref().unwrap_or("failed")
        ),
        StageStatus::Skipped => println!(
            "⏭️  {}: skipped ({})",
            report.stage,
            report.message.as_deref().unwrap_or("-")
        ),
    }
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _guard = logging::init_logging(&cli.log_dir);

    match cli.command {
        Commands::Normalize {
            drives,
            permissions,
            output,
        } => {
            let report = pipeline::normalize_files(&drives, &permissions, &output)
                .context("flatten stage failed")?;
            print_stage(&report);
        }
        Commands::Merge {
            primary,
            secondaries,
            output,
            first_match,
        } => {
            let policy = if first_match {
                DuplicateKeyPolicy::FirstMatch
            } else {
                DuplicateKeyPolicy::Reject
            };
            let report = pipeline::merge_files(&primary, &secondaries, policy, &output)
                .context("join stage failed")?;
            print_stage(&report);
        }
        Commands::DedupOrganizers { input, output } => {
            let report = pipeline::dedup_file(&input, &output).context("dedup stage failed")?;
            print_stage(&report);
        }
        Commands::Suspended {
            grants,
            suspended,
            output,
        } => {
            let report = pipeline::suspended_file(&grants, &suspended, &output)
                .context("suspension stage failed")?;
            print_stage(&report);
        }
        Commands::Run { config, summary } => {
            let config = Config::load(config.as_deref()).context("failed to load configuration")?;
            info!("Using inputs from {}", config.inputs.dir.display());

            let run = Pipeline::new(config).run()?;
            println!("\n📊 Run {}:", run.run_id);
            for stage in &run.stages {
                print_stage(stage);
            }

            if let Some(path) = summary {
                run.persist(&path)
                    .with_context(|| format!("failed to write summary to {}", path.display()))?;
                println!("💾 Summary saved to {}", path.display());
            }

            if !run.success() {
                error!("One or more stages failed");
                bail!("one or more stages failed");
            }
        }
    }
    Ok(())
}
