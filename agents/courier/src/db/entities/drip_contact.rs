use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "drip_contacts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub drip_id: i64,
    pub campaign_id: i64,
    pub contact_id: i64,
    pub user_id: i64,
    /// See `sengine_core::DripContactStatus`.
    pub status: i16,
    pub sent_at: Option<TimeDateTimeWithTimeZone>,
    pub message_id: Option<i64>,
    pub b_ref: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
