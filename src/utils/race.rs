//! Timeout-bounded races between two success signals
//!
//! Some vendor operations report their outcome twice: once as the return
//! value of the call and once as an event on the client's broadcast channel.
//! The two can disagree or arrive in either order. [`race_with_timeout`]
//! folds them into one result with the event taking precedence.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::protect::ProtectError;

/// Combine a returned value and an event into a single outcome.
///
/// - An event that arrives before the deadline wins.
/// - If `returned` settles first, the event still gets `grace` to override it.
/// - An event source that closes without firing (`None`) defers to `returned`.
/// - Nothing settling within `timeout` yields [`ProtectError::Timeout`].
pub async fn race_with_timeout<T, R, E>(
    operation: &'static str,
    returned: R,
    event: E,
    timeout: Duration,
    grace: Duration,
) -> Result<T, ProtectError>
where
    R: Future<Output = Result<T, ProtectError>>,
    E: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    tokio::pin!(returned);
    tokio::pin!(event);

    let race = async {
        tokio::select! {
            biased;

            fired = &mut event => match fired {
                Some(value) => Ok(value),
                None => (&mut returned).await,
            },
            result = &mut returned => {
                let grace_deadline = (Instant::now() + grace).min(deadline);
                match tokio::time::timeout_at(grace_deadline, &mut event).await {
                    Ok(Some(value)) => Ok(value),
                    _ => result,
                }
            }
        }
    };

    match tokio::time::timeout_at(deadline, race).await {
        Ok(result) => result,
        Err(_) => Err(ProtectError::Timeout {
            operation,
            limit: timeout,
        }),
    }
}

/// Bound a single fallible future by `limit`
pub async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, ProtectError>
where
    F: Future<Output = Result<T, ProtectError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtectError::Timeout { operation, limit }),
    }
}
