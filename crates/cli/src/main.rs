use api_shared::auth::ttl_from_env_value;
use api_shared::{SessionConfig, SessionKeys};
use clap::{Parser, Subcommand};
use prism_core::labs::PAYMENT_CATEGORIES;
use prism_core::records::VisitKey;
use prism_core::store::postgres::PgStore;
use prism_core::store::RecordStore;
use prism_core::{CoreConfig, LabKind, Role};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "prism")]
#[command(about = "PRISM lab workflow operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List lab disciplines, their panels and the payment categories
    Labs,
    /// List roles and the record categories each may write
    Roles,
    /// Check a record number and visit id
    CheckIds {
        /// 12-digit record number
        record_number: String,
        /// Visit id, e.g. A_100_2026
        visit_id: String,
    },
    /// Issue a session token for a role
    IssueToken {
        /// Role name, e.g. resident
        role: String,
        /// HMAC secret used by the API server
        #[arg(long, env = "PRISM_SESSION_SECRET", hide_env_values = true)]
        secret: String,
        /// Token lifetime in hours (default 12)
        #[arg(long, env = "PRISM_SESSION_TTL_HOURS")]
        ttl_hours: Option<String>,
    },
    /// Create the Postgres schema if it does not exist
    Migrate {
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: String,
    },
    /// Show the most recent unlock events
    Unlocks {
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: String,
        /// Maximum number of events to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Labs) => {
            for lab in LabKind::ALL {
                println!("{:<8} {:<8} {}", lab.as_str(), lab.label(), lab.panels().join(", "));
            }
            println!("payment: {}", PAYMENT_CATEGORIES.join(", "));
        }
        Some(Commands::Roles) => {
            for role in Role::ALL {
                let categories: Vec<String> = role
                    .categories()
                    .iter()
                    .map(|c| format!("{c:?}"))
                    .collect();
                let lab = role.owned_lab().map(|l| l.label()).unwrap_or("-");
                println!("{:<11} {:<8} {}", role.as_str(), lab, categories.join(", "));
            }
        }
        Some(Commands::CheckIds {
            record_number,
            visit_id,
        }) => {
            let key = check_ids(&record_number, &visit_id)?;
            println!("OK: {}", key);
        }
        Some(Commands::IssueToken {
            role,
            secret,
            ttl_hours,
        }) => {
            let role: Role = role.parse()?;
            let keys = SessionKeys::new(SessionConfig::new(secret, ttl_from_env_value(ttl_hours)?)?);
            let issued = keys.issue(role)?;
            println!("{}", issued.token);
            eprintln!("Expires at {}", issued.expires_at.to_rfc3339());
        }
        Some(Commands::Migrate { database_url }) => {
            let store = PgStore::connect(&database_url, Arc::new(CoreConfig::default())).await?;
            store.migrate().await?;
            println!("Schema is up to date.");
        }
        Some(Commands::Unlocks {
            database_url,
            limit,
        }) => {
            let store = PgStore::connect(&database_url, Arc::new(CoreConfig::default())).await?;
            let events = store.unlock_history(limit.max(1)).await?;
            if events.is_empty() {
                println!("No unlock events found.");
            } else {
                for event in events {
                    let lab = event.lab.map(|l| l.label()).unwrap_or("-");
                    println!(
                        "{} {} {} {} {} by {}: {}",
                        event.at.to_rfc3339(),
                        event.table.as_str(),
                        lab,
                        event.record_number,
                        event.visit_id,
                        event.unlocked_by,
                        event.reason
                    );
                }
            }
        }
        None => {
            println!("Use 'prism --help' for commands");
        }
    }

    Ok(())
}

fn check_ids(record_number: &str, visit_id: &str) -> anyhow::Result<VisitKey> {
    VisitKey::parse(record_number, visit_id).map_err(|e| anyhow::anyhow!("Invalid: {e}"))
}
