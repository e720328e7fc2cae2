use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Opaque unique token minted per send.
    pub uid: String,
    /// Short human-scannable tracking token (`DM-...`).
    pub b_ref: Option<String>,
    /// Provider id; non-null iff the send reached the gateway at least once.
    pub provider_message_id: Option<String>,
    pub from_number: String,
    pub to_number: String,
    pub body: String,
    pub media_url: Option<String>,
    /// Coarse numeric state, see `sengine_core::coarse`.
    pub status: i16,
    /// Provider textual state, verbatim.
    pub delivery_status: Option<String>,
    /// `outbound` or `inbound`.
    pub direction: String,
    pub is_drip: bool,
    pub drip_id: Option<i64>,
    pub user_id: i64,
    pub workspace_id: i64,
    pub contact_id: i64,
    /// See `sengine_core::MessageKind`.
    pub message_type: i16,
    pub is_charged: bool,
    pub is_read: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
