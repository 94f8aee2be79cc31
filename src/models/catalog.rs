use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// A wardrobe item as seen by the job subsystem (read-only).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub image_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An outfit as seen by the job subsystem (read-only).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Outfit {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One constituent item of an outfit, with the fields the generation
/// handlers send to the provider.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutfitPiece {
    pub item_id: Uuid,
    pub category: String,
    pub image_key: Option<String>,
}
