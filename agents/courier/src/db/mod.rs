//! Storage access for the courier.
//!
//! Two pools against the same primary: `writer` for mutations and the credit
//! ledger transactions, `reader` for scans and lookups, so long reads do not
//! starve writes. Query wrappers live in per-concern modules; the sea-orm
//! entities are under [`entities`].

pub use credits::{CreditError, LedgerReceipt};
pub use messages::{StorableInboundMessage, StorableOutboundMessage};

pub mod entities;

mod contacts;
mod credits;
mod messages;
mod scheduled;
mod users;
mod webhooks;

use eyre::Result;
use sea_orm::DbConn;

use sengine_base::db::connect_pool;
use sengine_base::settings::DbSettings;

/// Database interface for the courier workers.
#[derive(Clone, Debug)]
pub struct CourierDb {
    writer: DbConn,
    reader: DbConn,
}

impl CourierDb {
    /// Open the writer and reader pools.
    pub async fn connect(settings: &DbSettings) -> Result<Self> {
        Ok(Self {
            writer: connect_pool(&settings.url, "writer").await?,
            reader: connect_pool(&settings.url, "reader").await?,
        })
    }

    /// Both roles backed by one connection; unit tests run on sqlite where a
    /// second pool would open a second in-memory database.
    #[cfg(test)]
    pub(crate) fn for_tests(conn: DbConn) -> Self {
        Self {
            writer: conn.clone(),
            reader: conn,
        }
    }

    pub(crate) fn writer(&self) -> &DbConn {
        &self.writer
    }

    pub(crate) fn reader(&self) -> &DbConn {
        &self.reader
    }
}
