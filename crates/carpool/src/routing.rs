use async_trait::async_trait;
use model::trip::Location;
use utility::geo::Point;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Route {
    pub distance_km: f64,
    pub duration_min: f64,
    pub polyline: String,
    pub waypoints: Vec<Point>,
}

/// Contract for the (optional) geocoding/route provider. When unconfigured,
/// callers degrade to straight-segment geometry.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<Option<Location>>;

    async fn reverse_geocode(&self, point: Point) -> Result<Option<Location>>;

    async fn get_route(
        &self,
        origin: Point,
        destination: Point,
        waypoints: &[Point],
    ) -> Result<Route>;
}
