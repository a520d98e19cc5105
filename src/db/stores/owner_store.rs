use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{OwnerPreferenceStore, StoreError};
use crate::db::models::OwnerPreferences;

#[derive(Clone)]
pub struct PgOwnerPreferenceStore {
    pool: PgPool,
}

impl PgOwnerPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OwnerPreferenceStore for PgOwnerPreferenceStore {
    async fn for_monitor(
        &self,
        monitor_id: Uuid,
    ) -> Result<Option<OwnerPreferences>, StoreError> {
        let prefs = sqlx::query_as::<_, OwnerPreferences>(
            r#"
            SELECT u.email, u.alerts_enabled, u.alert_on_down, u.alert_on_up, u.cooldown_minutes
            FROM users u
            JOIN monitors m ON m.owner_id = u.id
            WHERE m.id = $1
            "#,
        )
        .bind(monitor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(prefs)
    }
}
