use async_trait::async_trait;
use carpool::database::{PolylineRepo, Result};
use utility::geo::Point;

use crate::{
    queries::polyline::{get, put},
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

#[async_trait]
impl PolylineRepo for PgDatabaseAutocommit {
    async fn cached_polyline(
        &mut self,
        origin: Point,
        destination: Point,
    ) -> Result<Option<String>> {
        get(&self.pool, origin, destination).await
    }

    async fn put_cached_polyline(
        &mut self,
        origin: Point,
        destination: Point,
        polyline: &str,
    ) -> Result<()> {
        put(&self.pool, origin, destination, polyline).await
    }
}

#[async_trait]
impl<'a> PolylineRepo for PgDatabaseTransaction<'a> {
    async fn cached_polyline(
        &mut self,
        origin: Point,
        destination: Point,
    ) -> Result<Option<String>> {
        get(&mut *self.tx, origin, destination).await
    }

    async fn put_cached_polyline(
        &mut self,
        origin: Point,
        destination: Point,
        polyline: &str,
    ) -> Result<()> {
        put(&mut *self.tx, origin, destination, polyline).await
    }
}
