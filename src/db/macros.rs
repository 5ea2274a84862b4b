//! Backend dispatch macro.
//!
//! Expands to a `match` over [`DbPool`](crate::db::pool::DbPool) variants so
//! each arm gets its concretely-typed `Pool<Driver>`, keeping generic
//! executor code monomorphized per backend.

/// Macro for generating backend dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => executor.run(p, &request).await,
///     Postgres(p) => executor.run(p, &request).await,
///     Sqlite(p) => executor.run(p, &request).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
