use sea_orm::entity::prelude::*;

/// Delivery row awaiting its first attempt.
pub const DELIVERY_PENDING: &str = "pending";
/// The endpoint returned 2xx.
pub const DELIVERY_SUCCESS: &str = "success";
/// The endpoint errored or was unreachable.
pub const DELIVERY_FAILED: &str = "failed";

/// Immutable attempt log for one webhook event delivery.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_deliveries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub webhook_id: i64,
    /// Globally unique event id, echoed in `X-Webhook-Delivery`.
    pub event_id: String,
    pub event_type: String,
    /// The signed JSON body, verbatim.
    pub payload: String,
    pub status: String,
    pub response_status: Option<i32>,
    /// Truncated response body (at most 5000 chars).
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub attempted_at: Option<TimeDateTimeWithTimeZone>,
    pub created_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
