use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::{debug, warn};
use model::{
    driver_trip::{DriverTrip, OfferStatus},
    matching::{MatchConfig, MatchResult, MatchStatus},
    pool::PoolAssignment,
    rider_request::{RequestStatus, RiderPreferences, RiderRequest},
    trip::{Location, Vehicle},
    user::User,
    WithId,
};
use utility::id::Id;

use crate::{
    database::{
        Database, DriverTripRepo as _, MatchConfigRepo as _, MatchRepo as _,
        PolylineRepo as _, PoolRepo as _, RiderRequestRepo as _, UserRepo as _,
    },
    error::{Error, Result},
    kv::KvStore,
    routing::RouteProvider,
};

pub mod engine;

pub use engine::{DropStats, EngineOutcome, ScoredCandidate};

const CONFIG_CACHE_TTL: Duration = Duration::from_secs(60);

pub const DEFAULT_TENANT: &str = "default";

fn config_cache_key(tenant: &str) -> String {
    format!("matchcfg:{}", tenant)
}

#[derive(Debug, Clone)]
pub struct NewDriverTrip {
    pub driver_id: Id<User>,
    pub origin: Location,
    pub destination: Location,
    pub departure_time: chrono::DateTime<Utc>,
    pub arrival_time: Option<chrono::DateTime<Utc>>,
    pub total_seats: i32,
    pub price_per_seat: f64,
    pub currency: String,
    pub vehicle: Vehicle,
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRiderRequest {
    pub rider_id: Id<User>,
    pub pickup: Location,
    pub dropoff: Location,
    pub earliest_departure: chrono::DateTime<Utc>,
    pub latest_departure: chrono::DateTime<Utc>,
    pub seats_needed: i32,
    pub preferences: RiderPreferences,
    pub organization_id: Option<String>,
}

#[derive(Debug)]
pub struct MatchOutcome {
    pub matches: Vec<WithId<MatchResult>>,
    pub stats: DropStats,
    pub considered: usize,
}

#[derive(Debug)]
pub struct PoolOutcome {
    pub matches: Vec<WithId<MatchResult>>,
    pub pool: Option<WithId<PoolAssignment>>,
    pub stats: DropStats,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub requests_processed: usize,
    pub requests_with_matches: usize,
    pub total_matched: usize,
}

/// Orchestrates the three matching phases against the stores: SQL
/// pre-filter, pure ranking, optional pool assembly. The matcher reads
/// offers and requests but never mutates their statuses; confirm/reject are
/// explicit user operations.
#[derive(Clone)]
pub struct MatchService<D: Database> {
    database: D,
    kv: Arc<dyn KvStore>,
    route_provider: Option<Arc<dyn RouteProvider>>,
}

impl<D: Database> MatchService<D> {
    pub fn new(database: D, kv: Arc<dyn KvStore>) -> Self {
        Self {
            database,
            kv,
            route_provider: None,
        }
    }

    pub fn with_route_provider(mut self, provider: Arc<dyn RouteProvider>) -> Self {
        self.route_provider = Some(provider);
        self
    }

    /// Tenant config, cached for 60 seconds: KV first, table second,
    /// defaults last.
    pub async fn get_config(&self, tenant: Option<&str>) -> Result<MatchConfig> {
        let tenant = tenant.unwrap_or(DEFAULT_TENANT);
        let cache_key = config_cache_key(tenant);
        match self.kv.get(&cache_key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(config) => return Ok(config),
                Err(why) => warn!("matching: dropping bad cached config: {}", why),
            },
            Ok(None) => {}
            Err(why) => warn!("matching: config cache read failed: {}", why),
        }

        let config = self
            .database
            .auto()
            .get_match_config(tenant)
            .await?
            .unwrap_or_default();
        self.cache_config(&cache_key, &config).await;
        Ok(config)
    }

    pub async fn set_config(&self, tenant: Option<&str>, config: &MatchConfig) -> Result<()> {
        let tenant = tenant.unwrap_or(DEFAULT_TENANT);
        self.database
            .auto()
            .put_match_config(tenant, config)
            .await?;
        self.cache_config(&config_cache_key(tenant), config).await;
        Ok(())
    }

    async fn cache_config(&self, cache_key: &str, config: &MatchConfig) {
        match serde_json::to_string(config) {
            Ok(raw) => {
                if let Err(why) =
                    self.kv.put(cache_key, raw, Some(CONFIG_CACHE_TTL)).await
                {
                    warn!("matching: config cache write failed: {}", why);
                }
            }
            Err(why) => warn!("matching: config not serialisable: {}", why),
        }
    }

    pub async fn create_driver_trip(
        &self,
        new: NewDriverTrip,
    ) -> Result<WithId<DriverTrip>> {
        if new.total_seats < 1 {
            return Err(Error::validation("totalSeats must be at least 1"));
        }
        if new.price_per_seat < 0.0 {
            return Err(Error::validation("pricePerSeat must not be negative"));
        }

        let config = self.get_config(new.organization_id.as_deref()).await?;
        let bbox = DriverTrip::bounding_box_for(
            &new.origin,
            &new.destination,
            config.search_radius_km,
        );
        let polyline = self.resolve_polyline(&new.origin, &new.destination).await;
        let driver = self.database.auto().get_user(&new.driver_id).await?;

        let trip = DriverTrip {
            driver_id: new.driver_id,
            origin: new.origin,
            destination: new.destination,
            bbox,
            departure_time: new.departure_time,
            arrival_time: new.arrival_time,
            total_seats: new.total_seats,
            available_seats: new.total_seats,
            price_per_seat: new.price_per_seat,
            currency: new.currency,
            vehicle: new.vehicle,
            status: OfferStatus::Offered,
            polyline,
            driver_rating: driver.content.rating,
            organization_id: new.organization_id,
            created_at: Utc::now(),
        };
        Ok(self.database.auto().insert_driver_trip(trip).await?)
    }

    /// Road geometry for the offer: polyline cache, then the route provider,
    /// then none (straight-segment fallback at match time). Best-effort.
    async fn resolve_polyline(
        &self,
        origin: &Location,
        destination: &Location,
    ) -> Option<String> {
        match self
            .database
            .auto()
            .cached_polyline(origin.point(), destination.point())
            .await
        {
            Ok(Some(polyline)) => return Some(polyline),
            Ok(None) => {}
            Err(why) => warn!("matching: polyline cache read failed: {:?}", why),
        }
        let provider = self.route_provider.as_ref()?;
        match provider
            .get_route(origin.point(), destination.point(), &[])
            .await
        {
            Ok(route) => {
                if let Err(why) = self
                    .database
                    .auto()
                    .put_cached_polyline(
                        origin.point(),
                        destination.point(),
                        &route.polyline,
                    )
                    .await
                {
                    warn!("matching: polyline cache write failed: {:?}", why);
                }
                Some(route.polyline)
            }
            Err(why) => {
                warn!("matching: route provider failed: {}", why);
                None
            }
        }
    }

    pub async fn create_rider_request(
        &self,
        new: NewRiderRequest,
    ) -> Result<WithId<RiderRequest>> {
        if new.earliest_departure >= new.latest_departure {
            return Err(Error::validation(
                "earliestDeparture must precede latestDeparture",
            ));
        }
        if !(1..=4).contains(&new.seats_needed) {
            return Err(Error::validation("seatsNeeded must be between 1 and 4"));
        }

        let request = RiderRequest {
            rider_id: new.rider_id,
            pickup: new.pickup,
            dropoff: new.dropoff,
            earliest_departure: new.earliest_departure,
            latest_departure: new.latest_departure,
            seats_needed: new.seats_needed,
            preferences: new.preferences,
            status: RequestStatus::Pending,
            matched_trip_id: None,
            organization_id: new.organization_id,
            created_at: Utc::now(),
        };
        Ok(self.database.auto().insert_rider_request(request).await?)
    }

    /// Phases A-C for one request. Match rows are upserted as `pending`;
    /// re-running refreshes scores without duplicating rows.
    pub async fn find_matches(
        &self,
        request_id: &Id<RiderRequest>,
    ) -> Result<MatchOutcome> {
        let request = self.database.auto().get_rider_request(request_id).await?;
        if request.content.status.is_terminal() {
            return Err(Error::conflict("rider request is no longer open"));
        }
        let config = self
            .get_config(request.content.organization_id.as_deref())
            .await?;

        let candidates = self
            .database
            .auto()
            .find_candidate_drivers(&request.content, &config)
            .await?;
        let outcome = engine::rank_candidates(&request.content, candidates, &config);
        debug!(
            "matching: request {} considered {} candidates, dropped {}",
            request.id,
            outcome.considered,
            outcome.stats.dropped()
        );

        let now = Utc::now();
        let mut matches = Vec::with_capacity(outcome.ranked.len());
        for scored in &outcome.ranked {
            let result = MatchResult {
                driver_trip_id: scored.driver_trip.id.clone(),
                rider_request_id: request.id.clone(),
                driver_id: scored.driver_trip.content.driver_id.clone(),
                rider_id: request.content.rider_id.clone(),
                score: scored.score,
                breakdown: scored.breakdown,
                estimated_pickup_time: scored.estimated_pickup_time,
                detour_minutes: scored.detour_minutes,
                pickup_distance_km: scored.pickup_distance_km,
                carbon_saved_kg: scored.carbon_saved_kg,
                explanation: scored.explanation.clone(),
                status: MatchStatus::Pending,
                created_at: now,
            };
            matches.push(self.database.auto().upsert_match(result).await?);
        }

        Ok(MatchOutcome {
            matches,
            stats: outcome.stats,
            considered: outcome.considered,
        })
    }

    /// Phases A-D: single-rider ranking plus greedy pool assembly against
    /// the best driver, when multi-rider matching is enabled for the tenant.
    pub async fn find_pool(
        &self,
        request_id: &Id<RiderRequest>,
    ) -> Result<PoolOutcome> {
        let outcome = self.find_matches(request_id).await?;
        let request = self.database.auto().get_rider_request(request_id).await?;
        let config = self
            .get_config(request.content.organization_id.as_deref())
            .await?;

        let Some(best) = outcome.matches.first() else {
            return Ok(PoolOutcome {
                matches: outcome.matches,
                pool: None,
                stats: outcome.stats,
            });
        };
        if !config.enable_multi_rider {
            return Ok(PoolOutcome {
                matches: outcome.matches,
                pool: None,
                stats: outcome.stats,
            });
        }

        let driver_trip_id = best.content.driver_trip_id.clone();
        let driver_trip = self
            .database
            .auto()
            .get_driver_trip(&driver_trip_id)
            .await?;
        let pending = self
            .database
            .auto()
            .pending_matches_for_driver_trip(&driver_trip_id)
            .await?;

        let mut candidates = Vec::with_capacity(pending.len());
        for entry in pending {
            let rider_request = self
                .database
                .auto()
                .get_rider_request(&entry.content.rider_request_id)
                .await?;
            candidates.push(engine::PoolCandidate {
                match_id: entry.id.clone(),
                rider_id: entry.content.rider_id.clone(),
                pickup: rider_request.content.pickup.clone(),
                dropoff: rider_request.content.dropoff.clone(),
                seats: rider_request.content.seats_needed,
                score: entry.content.score,
                detour_minutes: entry.content.detour_minutes,
            });
        }

        let pool = match engine::assemble_pool(&driver_trip, &candidates, &config) {
            Some(pool) => Some(self.database.auto().insert_pool(pool).await?),
            None => None,
        };

        Ok(PoolOutcome {
            matches: outcome.matches,
            pool,
            stats: outcome.stats,
        })
    }

    /// Confirms a pending match and reserves the rider's seats on the offer.
    pub async fn confirm_match(
        &self,
        match_id: &Id<MatchResult>,
        driver_trip_id: &Id<DriverTrip>,
        rider_request_id: &Id<RiderRequest>,
    ) -> Result<WithId<MatchResult>> {
        let entry = self.database.auto().get_match(match_id).await?;
        if entry.content.driver_trip_id != *driver_trip_id
            || entry.content.rider_request_id != *rider_request_id
        {
            return Err(Error::validation("match does not belong to the given pair"));
        }

        let request = self
            .database
            .auto()
            .get_rider_request(rider_request_id)
            .await?;

        let confirmed = self
            .database
            .auto()
            .transition_match(match_id, &[MatchStatus::Pending], MatchStatus::Confirmed)
            .await?;
        if confirmed == 0 {
            return Err(Error::conflict("match is no longer pending"));
        }

        let reserved = self
            .database
            .auto()
            .reserve_offer_seats(driver_trip_id, request.content.seats_needed)
            .await?;
        if reserved == 0 {
            // offer filled up in the meantime; roll the match back
            self.database
                .auto()
                .transition_match(
                    match_id,
                    &[MatchStatus::Confirmed],
                    MatchStatus::Pending,
                )
                .await?;
            return Err(Error::conflict("offer has no seats left"));
        }

        self.database
            .auto()
            .set_matched_trip(rider_request_id, Some(driver_trip_id))
            .await?;
        self.database
            .auto()
            .transition_rider_request(
                rider_request_id,
                &[RequestStatus::Pending, RequestStatus::Matched],
                RequestStatus::Confirmed,
            )
            .await?;

        Ok(self.database.auto().get_match(match_id).await?)
    }

    /// Withdraws an open offer.
    pub async fn cancel_driver_trip(
        &self,
        driver_trip_id: &Id<DriverTrip>,
        actor_id: &Id<User>,
    ) -> Result<()> {
        let offer = self.database.auto().get_driver_trip(driver_trip_id).await?;
        if offer.content.driver_id != *actor_id {
            return Err(Error::Authorization(
                "only the driver may cancel the offer".to_owned(),
            ));
        }
        let cancelled = self
            .database
            .auto()
            .transition_offer(
                driver_trip_id,
                &[OfferStatus::Offered, OfferStatus::Matched],
                OfferStatus::Cancelled,
            )
            .await?;
        if cancelled == 0 {
            return Err(Error::conflict("offer is already closed"));
        }
        Ok(())
    }

    /// Withdraws an open rider request.
    pub async fn cancel_rider_request(
        &self,
        request_id: &Id<RiderRequest>,
        actor_id: &Id<User>,
    ) -> Result<()> {
        let request = self.database.auto().get_rider_request(request_id).await?;
        if request.content.rider_id != *actor_id {
            return Err(Error::Authorization(
                "only the rider may cancel the request".to_owned(),
            ));
        }
        let cancelled = self
            .database
            .auto()
            .transition_rider_request(
                request_id,
                &[
                    RequestStatus::Pending,
                    RequestStatus::Matched,
                    RequestStatus::Confirmed,
                ],
                RequestStatus::Cancelled,
            )
            .await?;
        if cancelled == 0 {
            return Err(Error::conflict("request is already closed"));
        }
        Ok(())
    }

    pub async fn reject_match(
        &self,
        match_id: &Id<MatchResult>,
        reason: Option<&str>,
    ) -> Result<()> {
        let rejected = self
            .database
            .auto()
            .transition_match(match_id, &[MatchStatus::Pending], MatchStatus::Rejected)
            .await?;
        if rejected == 0 {
            return Err(Error::conflict("match is no longer pending"));
        }
        if let Some(reason) = reason {
            debug!("matching: match {} rejected: {}", match_id, reason);
        }
        Ok(())
    }

    /// Admin/cron sweep over pending requests. Each request's writes stand
    /// alone, so progress survives interruption; per-request failures are
    /// logged and skipped.
    pub async fn match_all_pending(&self, limit: usize) -> Result<BatchOutcome> {
        let pending = self
            .database
            .auto()
            .pending_rider_requests(limit)
            .await?;
        let mut outcome = BatchOutcome::default();
        for request in pending {
            outcome.requests_processed += 1;
            match self.find_matches(&request.id).await {
                Ok(found) if !found.matches.is_empty() => {
                    outcome.requests_with_matches += 1;
                    outcome.total_matched += found.matches.len();
                }
                Ok(_) => {}
                Err(why) => {
                    warn!("matching: batch skip for request {}: {}", request.id, why)
                }
            }
        }
        Ok(outcome)
    }
}
