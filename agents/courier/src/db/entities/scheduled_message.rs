use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "scheduled_messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub workspace_id: i64,
    pub contact_id: i64,
    pub drip_id: i64,
    pub campaign_id: i64,
    pub drip_contact_id: i64,
    pub from_number: Option<String>,
    pub to_number: String,
    pub body: String,
    pub media_url: Option<String>,
    pub scheduled_at: TimeDateTimeWithTimeZone,
    /// See `sengine_core::ScheduleStatus`.
    pub status: i16,
    pub retry_count: i32,
    pub queued_at: Option<TimeDateTimeWithTimeZone>,
    pub sent_at: Option<TimeDateTimeWithTimeZone>,
    pub error_message: Option<String>,
    /// Set once the send produced a `messages` row.
    pub message_id: Option<i64>,
    pub provider_message_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
