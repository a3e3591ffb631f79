#![forbid(unsafe_code)]

use super::super::error::{is_busy, StoreError};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Duration;

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 5_000;
const MAX_LOCK_RETRIES: u32 = 12;

/// Begin an immediate-lock transaction, retrying lock contention with
/// exponential backoff (10, 20, 40 ... ms, capped at 5 s).
pub(crate) fn immediate_tx(conn: &mut Connection) -> Result<Transaction<'_>, StoreError> {
    let mut delay = Duration::from_millis(INITIAL_BACKOFF_MS);
    let mut attempts = 0u32;
    loop {
        match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
            Ok(_) => break,
            Err(err) if is_busy(&err) => {
                if attempts >= MAX_LOCK_RETRIES {
                    return Err(StoreError::Locked);
                }
                attempts += 1;
                std::thread::sleep(delay);
                delay = (delay * 2).min(Duration::from_millis(MAX_BACKOFF_MS));
            }
            Err(err) => return Err(err.into()),
        }
    }
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(Into::into)
}
