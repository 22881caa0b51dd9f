//! Get user query
//!
//! Returns the user aggregate with its addresses embedded, in storage order.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::user::uuid_pattern;

#[derive(Debug, Clone)]
pub struct GetUserQuery {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserAddressView {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub addresses: Vec<UserAddressView>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetUserError {
    #[error("id must be a valid UUID")]
    InvalidId,
    #[error("user not found")]
    NotFound,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    phone_number: String,
}

#[tracing::instrument(skip(pool))]
pub async fn handle(pool: PgPool, query: GetUserQuery) -> Result<UserView, GetUserError> {
    if !uuid_pattern().is_match(&query.id) {
        return Err(GetUserError::InvalidId);
    }
    let user_id = Uuid::parse_str(&query.id).map_err(|_| GetUserError::InvalidId)?;

    let user = sqlx::query_as::<_, UserRow>(
        "SELECT id, name, email, phone_number FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(GetUserError::NotFound)?;

    let addresses = sqlx::query_as::<_, UserAddressView>(
        "SELECT street, city, state, zip_code, country FROM addresses \
         WHERE user_id = $1 ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    Ok(UserView {
        id: user.id,
        name: user.name,
        email: user.email,
        phone_number: user.phone_number,
        addresses,
    })
}
