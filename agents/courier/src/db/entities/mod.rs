//! `SeaORM` entities for the tables the courier reads and writes. Schema
//! ownership lives with the upstream API; these mirror the columns this
//! process touches.

pub mod contact;
pub mod credit_transaction;
pub mod drip_contact;
pub mod message;
pub mod opt_out;
pub mod scheduled_message;
pub mod user;
pub mod user_credits;
pub mod user_number;
pub mod webhook;
pub mod webhook_delivery;
