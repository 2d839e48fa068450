use std::{str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use farm_ledger::{
    common::TenantScope,
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::stock_lot::ItemType,
    metrics,
    services::ledger::{Discrepancy, LedgerService},
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "farm-ledger",
    about = "Maintenance commands for the farm stock ledger",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Compare cached balances against the lots for a tenant
    Audit {
        #[arg(long)]
        tenant: Uuid,
    },
    /// Recompute one cached balance from its lots
    Rebuild {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        item: Uuid,
        #[arg(long, value_parser = parse_item_type)]
        item_type: ItemType,
    },
    /// List the cached balances of one owner
    Balances {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        owner: Uuid,
    },
    /// Print the process metrics in Prometheus text format
    Metrics,
}

fn parse_item_type(raw: &str) -> Result<ItemType, String> {
    ItemType::from_str(raw).map_err(|_| format!("unknown item type '{}'", raw))
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;

        Ok(Self {
            config,
            db: Arc::new(db_pool),
        })
    }

    fn ledger(&self) -> LedgerService {
        LedgerService::new(self.db.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Metrics = cli.command {
        print!("{}", metrics::gather_text().context("failed to render metrics")?);
        return Ok(());
    }

    let context = CliContext::initialize().await?;
    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied ({})", context.config.environment);
        }
        Commands::Audit { tenant } => {
            let findings = context
                .ledger()
                .audit(&TenantScope::new(tenant))
                .await
                .context("audit failed")?;
            if cli.json {
                print_json(&findings)?;
            } else if findings.is_empty() {
                println!("No discrepancies found");
            } else {
                for finding in &findings {
                    render_discrepancy(finding);
                }
            }
        }
        Commands::Rebuild {
            tenant,
            owner,
            item,
            item_type,
        } => {
            let key = TenantScope::new(tenant).key(owner, item, item_type);
            let outcome = context
                .ledger()
                .rebuild_aggregate(key)
                .await
                .with_context(|| format!("failed to rebuild {}", key))?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                let before = outcome
                    .before
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "none".to_string());
                println!("{}: {} -> {}", outcome.key, before, outcome.after);
            }
        }
        Commands::Balances { tenant, owner } => {
            let rows = context
                .ledger()
                .balances_for_owner(&TenantScope::new(tenant), owner)
                .await
                .context("failed to load balances")?;
            if cli.json {
                print_json(&rows)?;
            } else {
                for row in &rows {
                    println!("- {} {} • {}", row.item_type, row.item_id, row.quantity);
                }
            }
        }
        Commands::Metrics => {}
    }

    Ok(())
}

fn render_discrepancy(finding: &Discrepancy) {
    match finding {
        Discrepancy::AggregateMismatch {
            key,
            aggregate,
            lots_available,
        } => println!(
            "- {} • cached {} but lots hold {}",
            key, aggregate, lots_available
        ),
        Discrepancy::ZeroAggregateRow { key } => println!("- {} • zero balance row kept", key),
        Discrepancy::LotOverdrawn {
            key,
            lot_id,
            counters,
        } => println!("- {} • lot {} overdrawn {:?}", key, lot_id, counters),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
