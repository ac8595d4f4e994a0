//! Stores and indexes of the restaurant database.

use bistro_store::{CreateStores, IndexSpec, Schema, SchemaError, StoreParams, StoreSpec};

/// Cached restaurant listings, keyed by `id`.
pub const RESTAURANTS: &str = "restaurants";

/// Cached confirmed reviews, keyed by `id`.
pub const REVIEWS: &str = "reviews";

/// Unconfirmed writes, keyed by an autoincrementing `queue_key`.
pub const OFFLINE_QUEUE: &str = "offline-queue";

/// Index on `restaurant_id`, present on `reviews` and `offline-queue`.
pub const BY_RESTAURANT: &str = "restaurant_id";

/// Key path of queued records.
pub const QUEUE_KEY_PATH: &str = "queue_key";

/// Every store the client relies on.
pub const ALL_STORES: [&str; 3] = [RESTAURANTS, REVIEWS, OFFLINE_QUEUE];

/// The restaurant schema.
///
/// # Errors
///
/// Never in practice; registration only fails on duplicate versions.
pub fn restaurant_schema() -> Result<Schema, SchemaError> {
    let mut schema = Schema::new();
    schema.register(
        CreateStores::new(1, "restaurants, reviews and offline queue")
            .store(StoreSpec::key_path(RESTAURANTS, "id"))
            .store(StoreSpec::key_path(REVIEWS, "id").index(IndexSpec::new(BY_RESTAURANT, "restaurant_id")))
            .store(
                StoreSpec::new(OFFLINE_QUEUE, StoreParams::key_path(QUEUE_KEY_PATH).auto_increment())
                    .index(IndexSpec::new(BY_RESTAURANT, "restaurant_id")),
            ),
    )?;
    Ok(schema)
}
