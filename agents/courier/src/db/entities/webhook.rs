use sea_orm::entity::prelude::*;

/// Status value of a subscription that receives events.
pub const WEBHOOK_ACTIVE: &str = "active";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "webhooks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub workspace_id: i64,
    pub url: String,
    pub secret: String,
    /// Comma-separated event tags this subscription wants.
    pub events: String,
    pub status: String,
    pub failure_count: i32,
    pub last_triggered_at: Option<TimeDateTimeWithTimeZone>,
    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether this subscription wants a given event tag.
    pub fn wants_event(&self, tag: &str) -> bool {
        self.events
            .split(',')
            .any(|candidate| candidate.trim() == tag)
    }
}
