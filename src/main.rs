use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use eit_track::backend::Backend;
use eit_track::config::Config;
use eit_track::db::{self, PgBackend};
use eit_track::models::{EitProfile, SupervisorProfile};
use eit_track::relationships::ConnectionOutcome;
use eit_track::{csaw, report, App};

#[derive(Parser)]
#[command(name = "eit-track")]
#[command(about = "Engineering-in-training progress tracker", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the skill catalog and sample accounts
    Seed,
    /// Show overall progress for an EIT
    Progress {
        #[arg(long)]
        email: String,
    },
    /// List skills and ranks for an EIT
    Skills {
        #[arg(long)]
        email: String,
    },
    /// Rank one skill for an EIT
    SetRank {
        #[arg(long)]
        email: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        rank: u8,
    },
    /// Import skill ranks from a CSV file (email,code,rank)
    ImportRanks {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List notifications for a user
    Notifications {
        #[arg(long)]
        email: String,
        #[arg(long)]
        mark_all: bool,
    },
    /// Request a supervisor connection for an EIT
    Connect {
        #[arg(long)]
        eit_email: String,
        #[arg(long)]
        supervisor_email: String,
    },
    /// Accept or deny a pending connection request
    #[command(group(
        ArgGroup::new("answer")
            .args(["accept", "deny"])
            .required(true)
            .multiple(false)
    ))]
    Respond {
        #[arg(long)]
        supervisor_email: String,
        #[arg(long)]
        relationship: Uuid,
        #[arg(long)]
        accept: bool,
        #[arg(long)]
        deny: bool,
    },
    /// Generate a markdown progress report
    Report {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export the CSAW form fields as CSV
    Csaw {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "csaw.csv")]
        out: PathBuf,
        /// CSV of skill_code,field_prefix overriding the built-in mapping
        #[arg(long)]
        mapping: Option<PathBuf>,
    },
    /// Follow live changes and print recomputed progress
    Watch {
        #[arg(long)]
        email: String,
    },
}

async fn eit_by_email(app: &App, email: &str) -> anyhow::Result<EitProfile> {
    app.backend
        .find_eit_by_email(email)
        .await?
        .with_context(|| format!("no EIT registered as {email}"))
}

async fn supervisor_by_email(app: &App, email: &str) -> anyhow::Result<SupervisorProfile> {
    app.backend
        .find_supervisor_by_email(email)
        .await?
        .with_context(|| format!("no supervisor registered as {email}"))
}

async fn user_by_email(app: &App, email: &str) -> anyhow::Result<Uuid> {
    if let Some(eit) = app.backend.find_eit_by_email(email).await? {
        return Ok(eit.id);
    }
    Ok(supervisor_by_email(app, email).await?.id)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let pool = cli.config.connect().await?;
    let app = App::new(
        Arc::new(PgBackend::new(pool.clone())),
        cli.config.mailer(),
        cli.config.notify_on_deny,
    );

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Progress { email } => {
            let eit = eit_by_email(&app, &email).await?;
            let snapshot = app.progress.initialize(eit.id).await?;
            println!(
                "{}: {}% overall ({} skills, {} experiences, {} approvals)",
                eit.full_name,
                snapshot.overall_progress,
                snapshot.completed_skills,
                snapshot.documented_experiences,
                snapshot.supervisor_approvals
            );
        }
        Commands::Skills { email } => {
            let eit = eit_by_email(&app, &email).await?;
            let categories = app.skills.load_user_skills(eit.id, false).await?;
            for category in categories {
                let percentage = category
                    .percentage()
                    .map(|p| format!("{p}%"))
                    .unwrap_or_else(|| "n/a".to_string());
                println!("{} ({percentage})", category.name);
                for skill in category.skills {
                    let rank = skill
                        .rank
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("  {} {} [{rank}]", skill.code, skill.name);
                }
            }
        }
        Commands::SetRank { email, code, rank } => {
            let eit = eit_by_email(&app, &email).await?;
            app.skills.set_rank_by_code(eit.id, &code, rank).await?;
            println!("Ranked {code} at {rank} for {}.", eit.full_name);
        }
        Commands::ImportRanks { csv } => {
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let written = app.skills.import_ranks(file).await?;
            println!("Imported {written} ranks from {}.", csv.display());
        }
        Commands::Notifications { email, mark_all } => {
            let user_id = user_by_email(&app, &email).await?;
            let center = app.notification_center(user_id);
            center.initialize().await?;

            if mark_all {
                let marked = center.mark_all_as_read().await?;
                println!("Marked {marked} notifications as read.");
            }

            println!("{} unread", center.unread_count().await);
            for notification in center.notifications().await {
                let marker = if notification.read { " " } else { "*" };
                println!(
                    "{marker} {} {}: {}",
                    notification.created_at.format("%Y-%m-%d %H:%M"),
                    notification.title,
                    notification.message
                );
            }
        }
        Commands::Connect {
            eit_email,
            supervisor_email,
        } => {
            let eit = eit_by_email(&app, &eit_email).await?;
            let outcome = app
                .relationships
                .request_connection(eit.id, &supervisor_email)
                .await?;
            if let ConnectionOutcome::Requested(relationship) = &outcome {
                info!(relationship = %relationship.id, "relationship created");
            }
            println!("{}", outcome.message());
        }
        Commands::Respond {
            supervisor_email,
            relationship,
            accept,
            deny: _,
        } => {
            let supervisor = supervisor_by_email(&app, &supervisor_email).await?;
            let updated = if accept {
                app.relationships.accept(supervisor.id, relationship).await?
            } else {
                app.relationships.deny(supervisor.id, relationship).await?
            };
            println!("Relationship {} is now {}.", updated.id, updated.status);
        }
        Commands::Report { email, out } => {
            let eit = eit_by_email(&app, &email).await?;
            let snapshot = app.progress.update_progress(eit.id).await?;
            let categories = app.skills.load_user_skills(eit.id, false).await?;
            let relationships = app.relationships.for_eit(eit.id).await?;
            let center = app.notification_center(eit.id);
            center.initialize().await?;

            let report = report::build_report(
                &eit,
                &snapshot,
                &categories,
                &relationships,
                &center.notifications().await,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Csaw {
            email,
            out,
            mapping,
        } => {
            let eit = eit_by_email(&app, &email).await?;
            let mapping = match mapping {
                Some(path) => {
                    let file = std::fs::File::open(&path)
                        .with_context(|| format!("failed to open {}", path.display()))?;
                    csaw::load_mapping(file)?
                }
                None => csaw::default_mapping(),
            };

            let bag = csaw::field_bag_for(app.backend.as_ref(), &app.skills, eit.id, &mapping).await?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            csaw::write_csv(&bag, file)?;
            println!("Wrote {} fields to {}.", bag.len(), out.display());
        }
        Commands::Watch { email } => {
            let eit = eit_by_email(&app, &email).await?;
            let snapshot = app.progress.initialize(eit.id).await?;
            println!("{}: {}%", eit.full_name, snapshot.overall_progress);

            let _listener = app.feed.listen(&pool).await?;
            let _progress = app.progress.watch(eit.id, &app.feed);

            let center = app.notification_center(eit.id);
            center.initialize().await?;
            let _notifications = center.watch(&app.feed);

            let mut last = snapshot.computed_at;
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("stopping watch");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Some(current) = app.progress.snapshot(eit.id).await {
                            if current.computed_at > last {
                                last = current.computed_at;
                                println!(
                                    "{}: {}% ({} unread notifications)",
                                    eit.full_name,
                                    current.overall_progress,
                                    center.unread_count().await
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    app.notifier.flush().await;
    Ok(())
}
