//! Fetch command implementation.

use super::open_client;
use bistro_offline::ClientConfig;
use std::path::Path;
use tracing::warn;

/// Runs the fetch command.
///
/// Reads go through the cache first, so stores that already hold data are
/// left as they are.
pub async fn run(journal: &Path, db: &str, base_url: &str, with_reviews: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::new(base_url).with_db_name(db);
    let client = open_client(journal, config).await?;

    let restaurants = client.fetch_restaurants().await?;
    println!("{} restaurants cached", restaurants.len());

    if with_reviews {
        let mut total = 0;
        for restaurant in &restaurants {
            match client.fetch_reviews(restaurant.id).await {
                Ok(reviews) => total += reviews.len(),
                Err(e) => warn!(restaurant_id = restaurant.id, error = %e, "reviews not fetched"),
            }
        }
        println!("{total} reviews cached");
    }

    Ok(())
}
