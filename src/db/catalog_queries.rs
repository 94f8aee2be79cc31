use sqlx::PgPool;
use uuid::Uuid;

use crate::models::catalog::{Item, Outfit, OutfitPiece};

/// Fetch a wardrobe item by primary key (read-only collaborator lookup).
pub async fn get_item(pool: &PgPool, item_id: Uuid) -> Result<Option<Item>, sqlx::Error> {
    sqlx::query_as::<_, Item>(
        r#"
        SELECT id, name, category, image_key, created_at
        FROM items
        WHERE id = $1
        "#,
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await
}

/// Fetch an outfit by primary key.
pub async fn get_outfit(pool: &PgPool, outfit_id: Uuid) -> Result<Option<Outfit>, sqlx::Error> {
    sqlx::query_as::<_, Outfit>(
        r#"
        SELECT id, name, created_at
        FROM outfits
        WHERE id = $1
        "#,
    )
    .bind(outfit_id)
    .fetch_optional(pool)
    .await
}

/// Constituent items of an outfit, in board order, with the image keys the
/// generation handlers resolve against the asset store.
pub async fn get_outfit_pieces(
    pool: &PgPool,
    outfit_id: Uuid,
) -> Result<Vec<OutfitPiece>, sqlx::Error> {
    sqlx::query_as::<_, OutfitPiece>(
        r#"
        SELECT i.id AS item_id, i.category, i.image_key
        FROM outfit_items oi
        JOIN items i ON i.id = oi.item_id
        WHERE oi.outfit_id = $1
        ORDER BY oi.position ASC
        "#,
    )
    .bind(outfit_id)
    .fetch_all(pool)
    .await
}
