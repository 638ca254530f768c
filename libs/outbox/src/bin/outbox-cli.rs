//! Operational escape hatch for replaying outbox rows directly, independent
//! of the DLQ reprocess admin API.
//!
//! Usage:
//!   outbox-cli replay-since <rfc3339-timestamp> <DATABASE_URL>
//!   outbox-cli replay-range <from-event-id> <to-event-id> <DATABASE_URL>

use std::sync::Arc;

use outbox::{OutboxRepository, SqlxOutboxRepository};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber_init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("replay-since") => {
            let since = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("missing <rfc3339-timestamp>"))?;
            let database_url = args
                .get(3)
                .ok_or_else(|| anyhow::anyhow!("missing <DATABASE_URL>"))?;
            let since = chrono::DateTime::parse_from_rfc3339(since)?.with_timezone(&chrono::Utc);
            let repo = repository_for(database_url).await?;
            let n = repo.replay_since(since).await?;
            println!("replayed {n} rows created since {since}");
        }
        Some("replay-range") => {
            let from = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("missing <from-event-id>"))?;
            let to = args
                .get(3)
                .ok_or_else(|| anyhow::anyhow!("missing <to-event-id>"))?;
            let database_url = args
                .get(4)
                .ok_or_else(|| anyhow::anyhow!("missing <DATABASE_URL>"))?;
            let from: Uuid = from.parse()?;
            let to: Uuid = to.parse()?;
            let repo = repository_for(database_url).await?;
            let n = repo.replay_range(from, to).await?;
            println!("replayed {n} rows between {from} and {to}");
        }
        _ => {
            eprintln!("usage: outbox-cli <replay-since|replay-range> ...");
            std::process::exit(2);
        }
    }
    Ok(())
}

async fn repository_for(database_url: &str) -> anyhow::Result<Arc<SqlxOutboxRepository>> {
    let pool = db_pool::create_pool(db_pool::DbConfig {
        database_url: database_url.to_string(),
        ..db_pool::DbConfig::for_service("outbox-cli")
    })
    .await?;
    Ok(Arc::new(SqlxOutboxRepository::new(pool)))
}

fn tracing_subscriber_init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
