//! Per-call time bounds for collaborator calls.

use std::future::Future;
use std::time::Duration;

use crate::error::{RagError, Result};

/// Await `fut` for at most `limit`, mapping an elapsed deadline through `on_elapsed`.
pub(crate) async fn bounded<T, F, E>(limit: Duration, fut: F, on_elapsed: E) -> Result<T>
where
    F: Future<Output = Result<T>>,
    E: FnOnce(Duration) -> RagError,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_elapsed(limit)),
    }
}
