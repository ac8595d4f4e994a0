//! Records exchanged with the API and kept in the local store.
//!
//! The restaurant server is loose with types: ids and flags sometimes arrive
//! as strings (`"7"`, `"true"`). Deserialization accepts both forms.

use crate::error::OfflineError;
use bistro_store::Key;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Geographic position of a restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
}

/// A restaurant listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    /// Primary key.
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Neighborhood, used for filtering.
    #[serde(default)]
    pub neighborhood: String,
    /// Cuisine, used for filtering.
    #[serde(default)]
    pub cuisine_type: String,
    /// Street address.
    #[serde(default)]
    pub address: String,
    /// Map position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latlng: Option<LatLng>,
    /// Photograph identifier.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub photograph: Option<String>,
    /// Opening hours by weekday.
    #[serde(default)]
    pub operating_hours: BTreeMap<String, String>,
    /// Whether the user marked the restaurant as a favorite.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_favorite: bool,
    /// Creation timestamp as sent by the server.
    #[serde(default, rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    /// Update timestamp as sent by the server.
    #[serde(default, rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Value>,
}

/// A review confirmed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Server-assigned primary key.
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    /// Reviewed restaurant.
    #[serde(deserialize_with = "lenient_i64")]
    pub restaurant_id: i64,
    /// Reviewer name.
    pub name: String,
    /// Rating from 1 to 5.
    #[serde(deserialize_with = "lenient_i64")]
    pub rating: i64,
    /// Review text.
    #[serde(default)]
    pub comments: String,
    /// Creation timestamp as sent by the server.
    #[serde(default, rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    /// Update timestamp as sent by the server.
    #[serde(default, rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Value>,
}

/// A review typed by the user and not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReview {
    /// Reviewed restaurant.
    pub restaurant_id: i64,
    /// Reviewer name.
    pub name: String,
    /// Rating from 1 to 5.
    pub rating: i64,
    /// Review text.
    pub comments: String,
}

impl NewReview {
    /// Creates a review payload.
    pub fn new(restaurant_id: i64, name: impl Into<String>, rating: i64, comments: impl Into<String>) -> Self {
        Self {
            restaurant_id,
            name: name.into(),
            rating,
            comments: comments.into(),
        }
    }

    /// Checks the payload before it is sent or queued.
    ///
    /// # Errors
    ///
    /// [`OfflineError::InvalidReview`] if the rating is outside 1..=5 or the
    /// name or comments are blank.
    pub fn validate(&self) -> Result<(), OfflineError> {
        if !(1..=5).contains(&self.rating) {
            return Err(OfflineError::invalid_review(format!(
                "rating must be between 1 and 5, got {}",
                self.rating
            )));
        }
        if self.name.trim().is_empty() {
            return Err(OfflineError::invalid_review("name is empty"));
        }
        if self.comments.trim().is_empty() {
            return Err(OfflineError::invalid_review("comments are empty"));
        }
        Ok(())
    }
}

/// What a queued record asks the server to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    /// Post a review.
    Review {
        /// The review payload.
        review: NewReview,
    },
    /// Set or clear the favorite flag.
    Favorite {
        /// Desired flag value.
        is_favorite: bool,
    },
}

impl Mutation {
    /// Short label for logs and listings.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Review { .. } => "review",
            Mutation::Favorite { .. } => "favorite",
        }
    }
}

/// A write waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// Assigned by the store on insert; orders replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_key: Option<u64>,
    /// Target restaurant (indexed).
    pub restaurant_id: i64,
    /// The intended write.
    #[serde(flatten)]
    pub mutation: Mutation,
    /// Milliseconds since the Unix epoch when the write was queued.
    pub queued_at: u64,
}

impl QueuedMutation {
    /// Wraps a mutation, stamping it with the current time.
    pub fn new(restaurant_id: i64, mutation: Mutation) -> Self {
        let queued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            queue_key: None,
            restaurant_id,
            mutation,
            queued_at,
        }
    }

    /// A queued review.
    pub fn review(review: NewReview) -> Self {
        Self::new(review.restaurant_id, Mutation::Review { review })
    }

    /// A queued favorite toggle.
    pub fn favorite(restaurant_id: i64, is_favorite: bool) -> Self {
        Self::new(restaurant_id, Mutation::Favorite { is_favorite })
    }

    /// The store key, once assigned.
    pub fn key(&self) -> Option<Key> {
        self.queue_key.map(Key::from)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match Lenient::deserialize(d)? {
        Lenient::Int(n) => Ok(n),
        Lenient::Float(f) if f.fract() == 0.0 => Ok(f as i64),
        Lenient::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got {s:?}"))),
        _ => Err(serde::de::Error::custom("expected an integer")),
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match Option::<Lenient>::deserialize(d)? {
        None => Ok(false),
        Some(Lenient::Bool(b)) => Ok(b),
        Some(Lenient::Int(n)) => Ok(n != 0),
        Some(Lenient::Text(s)) => match s.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("expected a flag, got {other:?}"))),
        },
        Some(Lenient::Float(_)) => Err(serde::de::Error::custom("expected a flag")),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Lenient>::deserialize(d)? {
        None => None,
        Some(Lenient::Text(s)) => Some(s),
        Some(Lenient::Int(n)) => Some(n.to_string()),
        Some(Lenient::Float(f)) => Some(f.to_string()),
        Some(Lenient::Bool(b)) => Some(b.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn restaurant_accepts_server_quirks() {
        let r: Restaurant = serde_json::from_value(json!({
            "id": "3",
            "name": "Kang Ho Dong Baekjeong",
            "neighborhood": "Manhattan",
            "photograph": 3,
            "cuisine_type": "Asian",
            "latlng": {"lat": 40.747_143, "lng": -73.985_414},
            "is_favorite": "true",
            "createdAt": 1_504_095_567_183u64
        }))
        .unwrap();
        assert_eq!(r.id, 3);
        assert!(r.is_favorite);
        assert_eq!(r.photograph.as_deref(), Some("3"));
        assert_eq!(r.latlng.unwrap().lng, -73.985_414);
    }

    #[test]
    fn missing_favorite_flag_is_false() {
        let r: Restaurant = serde_json::from_value(json!({"id": 1, "name": "x"})).unwrap();
        assert!(!r.is_favorite);
    }

    #[test]
    fn review_validation() {
        assert!(NewReview::new(7, "Ann", 5, "great").validate().is_ok());
        assert!(NewReview::new(7, "Ann", 0, "great").validate().is_err());
        assert!(NewReview::new(7, "Ann", 6, "great").validate().is_err());
        assert!(NewReview::new(7, " ", 3, "great").validate().is_err());
        assert!(NewReview::new(7, "Ann", 3, "").validate().is_err());
    }

    #[test]
    fn queued_mutation_layout() {
        let queued = QueuedMutation::favorite(4, true);
        let value = serde_json::to_value(&queued).unwrap();
        assert_eq!(value["kind"], json!("favorite"));
        assert_eq!(value["restaurant_id"], json!(4));
        assert!(value.get("queue_key").is_none());

        let mut stored = value;
        stored["queue_key"] = json!(12);
        let back: QueuedMutation = serde_json::from_value(stored).unwrap();
        assert_eq!(back.key(), Some(Key::from(12u64)));
        assert_eq!(back.mutation, Mutation::Favorite { is_favorite: true });
    }

    #[test]
    fn queued_review_keeps_payload() {
        let queued = QueuedMutation::review(NewReview::new(7, "Ann", 5, "great"));
        let value = serde_json::to_value(&queued).unwrap();
        assert_eq!(value["kind"], json!("review"));
        assert_eq!(value["review"]["comments"], json!("great"));
        assert_eq!(queued.mutation.kind(), "review");
    }
}
