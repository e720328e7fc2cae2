use sea_orm::entity::prelude::*;

/// The user's messaging is enabled iff `messaging_status` equals this.
pub const MESSAGING_ACTIVE: &str = "active";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub workspace_id: i64,
    /// Tenant-specific gateway account, overriding the process default.
    pub provider_account_id: Option<String>,
    pub provider_auth_token: Option<String>,
    pub messaging_status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether this user may send messages at all.
    pub fn can_message(&self) -> bool {
        self.messaging_status == MESSAGING_ACTIVE
    }
}
