use log::{info, Level};
use logging_timer::timer;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::{ErrorCode, Transaction};

use crate::cancel::CancelToken;
use crate::error::SqlMigrateError;

use super::file::MigrationFile;

pub struct Executor;

impl Executor {
    /// Runs one script inside the caller's transaction.
    ///
    /// Never commits or rolls back. On error the caller drops the transaction,
    /// which discards every statement of the batch. Scripts may not end or
    /// start transactions themselves: `BEGIN`, `COMMIT`, `END` and `ROLLBACK`
    /// are refused while the script runs.
    pub fn apply(
        tx: &Transaction,
        file: &MigrationFile,
        sql: &str,
        cancel: &CancelToken,
    ) -> Result<(), SqlMigrateError> {
        cancel.check()?;

        let _tmr = timer!(Level::Debug; "Executor.apply", "{}", file.file_name());
        info!("Running migration file {}", file.file_name());

        tx.authorizer(Some(deny_transaction_control));
        let result = tx.execute_batch(sql);
        tx.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);

        result.map_err(|err| {
            if cancel.is_cancelled() || err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
                SqlMigrateError::Interrupted
            } else {
                SqlMigrateError::ExecutionError {
                    file: file.file_name().to_owned(),
                    source: err,
                }
            }
        })
    }
}

fn deny_transaction_control(ctx: AuthContext<'_>) -> Authorization {
    match ctx.action {
        AuthAction::Transaction { .. } => Authorization::Deny,
        _ => Authorization::Allow,
    }
}
