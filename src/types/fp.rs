//! Small helpers for pooled-connection usage.
//!
//! Notes
//! -----
//! - Keep this module dependency-light.
//! - Use at module edges to keep queue code concise.

use crate::errors::ArchiverError;
use deadpool_redis::Pool;

/// Borrow a pooled Redis connection and run the provided async action.
/// Pool errors surface as `Queue` errors.
pub async fn with_conn<T, F, Fut>(pool: &Pool, f: F) -> Result<T, ArchiverError>
where
    F: FnOnce(deadpool_redis::Connection) -> Fut,
    Fut: std::future::Future<Output = Result<T, ArchiverError>>,
{
    let conn = pool
        .get()
        .await
        .map_err(|e| ArchiverError::Queue(format!("pool: {e}")))?;
    f(conn).await
}

/// Map a redis command failure into the crate error.
pub fn queue_err(op: &'static str) -> impl Fn(deadpool_redis::redis::RedisError) -> ArchiverError {
    move |e| ArchiverError::Queue(format!("{op}: {e}"))
}
