//! Replay command implementation.

use super::open_client;
use bistro_offline::{ClientConfig, Confirmation, ReplayConfig};
use std::path::Path;
use std::time::Duration;

/// Runs the replay command.
pub async fn run(
    journal: &Path,
    db: &str,
    base_url: &str,
    timeout_secs: u64,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !journal.exists() {
        return Err(format!("No journal found at {:?}", journal).into());
    }

    let mut replay = ReplayConfig::new().with_on_reconnect(false);
    if let Some(max) = limit {
        replay = replay.with_max_records(max);
    }
    let config = ClientConfig::new(base_url)
        .with_db_name(db)
        .with_network_timeout(Duration::from_secs(timeout_secs))
        .with_replay(replay);
    let client = open_client(journal, config).await?;
    let report = client.replay_queue().await?;

    for confirmation in &report.confirmed {
        match confirmation {
            Confirmation::Review {
                queue_key,
                review: Some(review),
            } => {
                println!("confirmed {queue_key}: review {} for restaurant {}", review.id, review.restaurant_id);
            }
            Confirmation::Review { queue_key, review: None } => {
                println!("confirmed {queue_key}: review accepted");
            }
            Confirmation::Favorite {
                queue_key,
                restaurant_id,
                is_favorite,
                ..
            } => {
                println!("confirmed {queue_key}: restaurant {restaurant_id} is_favorite = {is_favorite}");
            }
        }
    }
    for failure in &report.failed {
        println!(
            "failed    {}: restaurant {} ({})",
            failure.queue_key, failure.restaurant_id, failure.reason
        );
    }
    for key in &report.skipped {
        println!("skipped   {key}: unreadable record");
    }
    println!(
        "{} attempted, {} confirmed, {} still queued",
        report.attempted,
        report.confirmed.len(),
        report.failed.len() + report.skipped.len()
    );

    Ok(())
}
