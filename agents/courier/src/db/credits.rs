use sea_orm::sea_query::Expr;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QuerySelect, TransactionTrait,
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::instrument;

use super::entities::{credit_transaction, user_credits};
use super::CourierDb;

/// Failures of the credit ledger.
#[derive(Debug, Error)]
pub enum CreditError {
    /// The balance cannot cover the requested debit.
    #[error("insufficient credits: balance {balance}, required {required}")]
    Insufficient {
        /// Balance at decision time.
        balance: i64,
        /// Amount the debit asked for.
        required: i64,
    },
    /// The storage layer failed.
    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Outcome of a committed ledger movement.
#[derive(Clone, Copy, Debug)]
pub struct LedgerReceipt {
    /// Balance after the movement.
    pub balance_after: i64,
    /// Id of the audit row.
    pub transaction_id: i64,
}

impl CourierDb {
    /// Cheap non-transactional balance check; the transactional debit is the
    /// authority, this only avoids pointless gateway-side work.
    pub async fn has_enough_credits(&self, user_id: i64, amount: i64) -> Result<bool, DbErr> {
        let row = user_credits::Entity::find_by_id(user_id)
            .one(self.reader())
            .await?;
        Ok(row.map(|r| r.balance >= amount).unwrap_or(false))
    }

    /// Debit a user inside a transaction with the balance row locked.
    ///
    /// Writes the new balance and a matching audit row, or fails with
    /// [`CreditError::Insufficient`] leaving no trace.
    #[instrument(skip(self, description))]
    pub async fn deduct_credits(
        &self,
        user_id: i64,
        amount: i64,
        description: &str,
        reference_type: &str,
        reference_id: i64,
        now: OffsetDateTime,
    ) -> Result<LedgerReceipt, CreditError> {
        let txn = self.writer().begin().await?;

        let row = user_credits::Entity::find_by_id(user_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or(CreditError::Insufficient {
                balance: 0,
                required: amount,
            })?;
        if row.balance < amount {
            // Dropping the transaction rolls it back.
            return Err(CreditError::Insufficient {
                balance: row.balance,
                required: amount,
            });
        }

        let balance_after = row.balance - amount;
        user_credits::Entity::update_many()
            .col_expr(user_credits::Column::Balance, Expr::value(balance_after))
            .col_expr(
                user_credits::Column::TotalSpent,
                Expr::value(row.total_spent + amount),
            )
            .col_expr(user_credits::Column::UpdatedAt, Expr::value(now))
            .filter(user_credits::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        let audit = credit_transaction::ActiveModel {
            id: NotSet,
            user_id: Set(user_id),
            kind: Set(credit_transaction::KIND_DEBIT.to_string()),
            amount: Set(-amount),
            balance_after: Set(balance_after),
            description: Set(description.to_string()),
            reference_type: Set(Some(reference_type.to_string())),
            reference_id: Set(Some(reference_id)),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(LedgerReceipt {
            balance_after,
            transaction_id: audit.id,
        })
    }

    /// Credit a user back, symmetric to [`CourierDb::deduct_credits`].
    /// Never fails on balance.
    #[instrument(skip(self, description))]
    pub async fn refund_credits(
        &self,
        user_id: i64,
        amount: i64,
        description: &str,
        reference_type: &str,
        reference_id: i64,
        now: OffsetDateTime,
    ) -> Result<LedgerReceipt, CreditError> {
        let txn = self.writer().begin().await?;

        let row = user_credits::Entity::find_by_id(user_id)
            .lock_exclusive()
            .one(&txn)
            .await?;
        let (balance, total_spent) = row
            .map(|r| (r.balance, r.total_spent))
            .unwrap_or((0, 0));

        let balance_after = balance + amount;
        user_credits::Entity::update_many()
            .col_expr(user_credits::Column::Balance, Expr::value(balance_after))
            .col_expr(
                user_credits::Column::TotalSpent,
                Expr::value((total_spent - amount).max(0)),
            )
            .col_expr(user_credits::Column::UpdatedAt, Expr::value(now))
            .filter(user_credits::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        let audit = credit_transaction::ActiveModel {
            id: NotSet,
            user_id: Set(user_id),
            kind: Set(credit_transaction::KIND_CREDIT.to_string()),
            amount: Set(amount),
            balance_after: Set(balance_after),
            description: Set(description.to_string()),
            reference_type: Set(Some(reference_type.to_string())),
            reference_id: Set(Some(reference_id)),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(LedgerReceipt {
            balance_after,
            transaction_id: audit.id,
        })
    }
}
