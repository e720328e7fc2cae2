use sea_orm::entity::prelude::*;

/// `type` column value of a debit row.
pub const KIND_DEBIT: &str = "debit";
/// `type` column value of a credit (refund) row.
pub const KIND_CREDIT: &str = "credit";

/// Immutable audit row. The sum of `amount` per user equals the user's
/// current balance.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credit_transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    /// `debit` or `credit`.
    #[sea_orm(column_name = "type")]
    pub kind: String,
    /// Signed: negative for debits, positive for credits.
    pub amount: i64,
    pub balance_after: i64,
    pub description: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
    pub created_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
