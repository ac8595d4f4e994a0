//! Queue command implementation.

use super::open_engine;
use bistro_offline::schema::restaurant_schema;
use bistro_offline::{Mutation, OfflineQueue, QueuedMutation};
use std::path::Path;

/// Runs the queue command.
pub async fn run(
    journal: &Path,
    db: &str,
    restaurant: Option<i64>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(journal)?;
    let schema = restaurant_schema()?;
    let database = schema.open(&engine, db, schema.latest_version()).await?;
    let queue = OfflineQueue::new(database);

    let pending = match restaurant {
        Some(id) => queue.pending_for(id).await?,
        None => queue.pending().await?,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&pending)?);
        }
        _ => {
            print_text_output(&pending);
        }
    }

    Ok(())
}

fn print_text_output(pending: &[QueuedMutation]) {
    if pending.is_empty() {
        println!("Queue is empty");
        return;
    }

    println!("{:>6}  {:>10}  {:<8}  details", "key", "restaurant", "kind");
    for queued in pending {
        let key = queued.queue_key.map(|k| k.to_string()).unwrap_or_default();
        let details = match &queued.mutation {
            Mutation::Review { review } => format!("{} rated {}: {}", review.name, review.rating, review.comments),
            Mutation::Favorite { is_favorite } => format!("is_favorite = {is_favorite}"),
        };
        println!(
            "{key:>6}  {:>10}  {:<8}  {details}",
            queued.restaurant_id,
            queued.mutation.kind()
        );
    }
    println!("{} pending", pending.len());
}
