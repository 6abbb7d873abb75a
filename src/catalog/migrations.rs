use anyhow::{Context, Result};
use futures::future::BoxFuture;

type Migration<P> = for<'a> fn(&'a P) -> BoxFuture<'a, Result<()>>;

/// Versioned schema steps of a catalog backend.
pub trait CatalogMigrations {
    type Pool;

    fn ensure_migrations_table(pool: &Self::Pool) -> BoxFuture<'_, Result<()>>;
    fn current_version(pool: &Self::Pool) -> BoxFuture<'_, Result<i64>>;
    fn record_version(pool: &Self::Pool, version: i64) -> BoxFuture<'_, Result<()>>;

    /// Base tables: datasets, uploads, columns, table handles, row errors.
    fn migrate_v1(pool: &Self::Pool) -> BoxFuture<'_, Result<()>>;
    /// Lookup indexes.
    fn migrate_v2(pool: &Self::Pool) -> BoxFuture<'_, Result<()>>;
}

/// Apply every step newer than the recorded version, in order.
pub async fn run_migrations<M: CatalogMigrations>(pool: &M::Pool) -> Result<()> {
    M::ensure_migrations_table(pool).await?;

    let mut current_version = M::current_version(pool).await?;
    let steps: &[(i64, Migration<M::Pool>)] = &[(1, M::migrate_v1), (2, M::migrate_v2)];

    for (version, apply) in steps {
        if current_version < *version {
            apply(pool)
                .await
                .with_context(|| format!("Catalog migration v{} failed", version))?;
            M::record_version(pool, *version).await?;
            tracing::info!(version = *version, "Applied catalog migration");
            current_version = *version;
        }
    }

    Ok(())
}
