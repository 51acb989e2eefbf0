use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use model::{
    driver_trip::DriverTrip,
    matching::{MatchConfig, MatchResult, ScoreBreakdown},
    pool::{PoolAssignment, PoolMember, PoolStatus, PoolStop, StopKind},
    rider_request::{OrgPreference, RiderRequest},
    trip::Location,
    user::User,
    WithId,
};
use serde::Serialize;
use utility::{
    geo::{self, Point},
    id::Id,
};

/// Rough CO2 saved per shared passenger-kilometre, versus a solo car trip.
const CARBON_KG_PER_KM: f64 = 0.12;

/// Rating assumed for drivers without reviews yet.
const UNRATED_DRIVER_RATING: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    TimeWindow,
    PickupDistance,
    DropoffDistance,
    Seats,
    Rating,
    Accessibility,
    Organization,
}

/// Per-reason drop tallies surfaced to the admin matching-stats view.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropStats {
    pub time_window: u32,
    pub pickup_distance: u32,
    pub dropoff_distance: u32,
    pub seats: u32,
    pub rating: u32,
    pub accessibility: u32,
    pub organization: u32,
}

impl DropStats {
    fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::TimeWindow => self.time_window += 1,
            DropReason::PickupDistance => self.pickup_distance += 1,
            DropReason::DropoffDistance => self.dropoff_distance += 1,
            DropReason::Seats => self.seats += 1,
            DropReason::Rating => self.rating += 1,
            DropReason::Accessibility => self.accessibility += 1,
            DropReason::Organization => self.organization += 1,
        }
    }

    pub fn dropped(&self) -> u32 {
        self.time_window
            + self.pickup_distance
            + self.dropoff_distance
            + self.seats
            + self.rating
            + self.accessibility
            + self.organization
    }
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub driver_trip: WithId<DriverTrip>,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub detour_minutes: f64,
    pub pickup_distance_km: f64,
    pub estimated_pickup_time: DateTime<Utc>,
    pub carbon_saved_kg: f64,
    pub same_org: bool,
    pub explanation: String,
}

#[derive(Debug, Clone, Default)]
pub struct EngineOutcome {
    pub ranked: Vec<ScoredCandidate>,
    pub stats: DropStats,
    pub considered: usize,
}

struct GatedCandidate {
    driver_trip: WithId<DriverTrip>,
    detour_minutes: f64,
    pickup_distance_km: f64,
    time_offset_min: f64,
    driver_rating: f64,
    same_org: bool,
    carbon_saved_kg: f64,
    estimated_pickup_time: DateTime<Utc>,
}

/// Phases B and C over the pre-filtered candidate list: geometric and
/// temporal gates, then composite scoring. Pure; never fails. An empty
/// candidate list yields an empty ranking.
pub fn rank_candidates(
    request: &RiderRequest,
    candidates: Vec<WithId<DriverTrip>>,
    config: &MatchConfig,
) -> EngineOutcome {
    let mid_window = request.mid_window();

    // Phase A tail: defensive cap, closest departure first.
    let mut candidates = candidates;
    candidates.sort_by_key(|candidate| {
        (candidate.content.departure_time - mid_window)
            .num_seconds()
            .abs()
    });
    candidates.truncate(config.max_candidates);
    let considered = candidates.len();

    let mut stats = DropStats::default();
    let mut gated = Vec::new();
    for candidate in candidates {
        match apply_gates(request, candidate, config, mid_window) {
            Ok(passed) => gated.push(passed),
            Err(reason) => stats.record(reason),
        }
    }

    // Carbon bonus is normalised against the best saver in this evaluation.
    let max_saved = gated
        .iter()
        .map(|candidate| candidate.carbon_saved_kg)
        .fold(0.0, f64::max);

    let mut ranked: Vec<ScoredCandidate> = gated
        .into_iter()
        .map(|candidate| score_candidate(candidate, config, request, max_saved))
        .collect();

    ranked.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.detour_minutes
                    .partial_cmp(&b.detour_minutes)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                let rating_a = a.driver_trip.content.driver_rating.unwrap_or(UNRATED_DRIVER_RATING);
                let rating_b = b.driver_trip.content.driver_rating.unwrap_or(UNRATED_DRIVER_RATING);
                rating_b
                    .partial_cmp(&rating_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                a.driver_trip
                    .content
                    .created_at
                    .cmp(&b.driver_trip.content.created_at)
            })
    });
    ranked.truncate(config.max_results);

    EngineOutcome {
        ranked,
        stats,
        considered,
    }
}

fn apply_gates(
    request: &RiderRequest,
    candidate: WithId<DriverTrip>,
    config: &MatchConfig,
    mid_window: DateTime<Utc>,
) -> Result<GatedCandidate, DropReason> {
    let trip = &candidate.content;

    let earliest = request.earliest_departure - Duration::minutes(config.time_slack_min);
    if trip.departure_time < earliest || trip.departure_time > request.latest_departure {
        return Err(DropReason::TimeWindow);
    }

    let route = trip.route();
    let pickup = request.pickup.point();
    let dropoff = request.dropoff.point();

    let pickup_distance_km = geo::distance_to_route_km(pickup, &route);
    if pickup_distance_km > config.max_pickup_distance_km {
        return Err(DropReason::PickupDistance);
    }

    if geo::distance_to_route_km(dropoff, &route) > config.max_dropoff_distance_km {
        return Err(DropReason::DropoffDistance);
    }

    if trip.available_seats < request.seats_needed {
        return Err(DropReason::Seats);
    }

    let driver_rating = trip.driver_rating.unwrap_or(UNRATED_DRIVER_RATING);
    let min_rating = config
        .min_driver_rating
        .max(request.preferences.min_driver_rating.unwrap_or(0.0));
    if driver_rating < min_rating {
        return Err(DropReason::Rating);
    }

    if request.preferences.wheelchair_needed && !trip.vehicle.wheelchair_accessible {
        return Err(DropReason::Accessibility);
    }

    let same_org = match (&trip.organization_id, &request.organization_id) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    if request.preferences.same_org == OrgPreference::Strict && !same_org {
        return Err(DropReason::Organization);
    }

    let detour_minutes =
        geo::detour_minutes(&route, pickup, dropoff, config.avg_speed_km_h);
    let time_offset_min =
        (trip.departure_time - mid_window).num_seconds().abs() as f64 / 60.0;

    // CO2 the rider saves by not driving the direct leg themselves.
    let direct_km = geo::haversine_km(pickup, dropoff);
    let carbon_saved_kg = direct_km * request.seats_needed as f64 * CARBON_KG_PER_KM;

    let km_to_pickup = geo::haversine_km(trip.origin.point(), pickup);
    let estimated_pickup_time = trip.departure_time
        + Duration::seconds(
            (km_to_pickup / config.avg_speed_km_h * 3600.0).round() as i64,
        );

    Ok(GatedCandidate {
        driver_trip: candidate,
        detour_minutes,
        pickup_distance_km,
        time_offset_min,
        driver_rating,
        same_org,
        carbon_saved_kg,
        estimated_pickup_time,
    })
}

fn score_candidate(
    candidate: GatedCandidate,
    config: &MatchConfig,
    request: &RiderRequest,
    max_saved: f64,
) -> ScoredCandidate {
    let weights = &config.weights;
    let half_width = request.window_half_width_min().max(1.0);

    let breakdown = ScoreBreakdown {
        detour: weights.detour * candidate.detour_minutes / config.max_detour_min.max(1.0),
        pickup: weights.pickup * candidate.pickup_distance_km
            / config.max_pickup_distance_km.max(f64::EPSILON),
        time: weights.time * candidate.time_offset_min / half_width,
        rating: weights.rating * (5.0 - candidate.driver_rating) / 4.0,
        org: weights.org * if candidate.same_org { 0.0 } else { 1.0 },
        carbon: if max_saved > 0.0 {
            weights.carbon * candidate.carbon_saved_kg / max_saved
        } else {
            0.0
        },
    };
    let score = breakdown.detour + breakdown.pickup + breakdown.time + breakdown.rating
        + breakdown.org
        - breakdown.carbon;

    let explanation = explain(&candidate);

    ScoredCandidate {
        driver_trip: candidate.driver_trip,
        score,
        breakdown,
        detour_minutes: candidate.detour_minutes,
        pickup_distance_km: candidate.pickup_distance_km,
        estimated_pickup_time: candidate.estimated_pickup_time,
        carbon_saved_kg: candidate.carbon_saved_kg,
        same_org: candidate.same_org,
        explanation,
    }
}

fn explain(candidate: &GatedCandidate) -> String {
    let mut parts = vec![
        format!("{:.0}-min detour", candidate.detour_minutes),
        format!("{:.1} km walk", candidate.pickup_distance_km),
    ];
    if candidate.same_org {
        parts.push("same org".to_owned());
    }
    parts.push(format!("{:.1}★", candidate.driver_rating));
    parts.join(", ")
}

/// One admitted rider as pool-assembly input, extracted from a pending
/// match and its rider request.
#[derive(Debug, Clone)]
pub struct PoolCandidate {
    pub match_id: Id<MatchResult>,
    pub rider_id: Id<User>,
    pub pickup: Location,
    pub dropoff: Location,
    pub seats: i32,
    pub score: f64,
    pub detour_minutes: f64,
}

/// Phase D: greedy pool assembly for one driver. Riders are admitted by
/// ascending score while cumulative seats fit the vehicle and cumulative
/// detour stays inside the pool budget; the stop order is a
/// nearest-neighbour tour from the driver's origin that always visits a
/// rider's pickup before their dropoff.
pub fn assemble_pool(
    driver_trip: &WithId<DriverTrip>,
    candidates: &[PoolCandidate],
    config: &MatchConfig,
) -> Option<PoolAssignment> {
    let mut ordered: Vec<&PoolCandidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total_seats = driver_trip.content.total_seats;
    let mut members: Vec<&PoolCandidate> = Vec::new();
    let mut seats_used = 0;
    let mut total_detour = 0.0;
    for candidate in ordered {
        if seats_used + candidate.seats > total_seats {
            continue;
        }
        if total_detour + candidate.detour_minutes > config.max_pool_detour_min {
            continue;
        }
        seats_used += candidate.seats;
        total_detour += candidate.detour_minutes;
        members.push(candidate);
    }
    if members.is_empty() {
        return None;
    }

    let stops = order_stops(driver_trip.content.origin.point(), &members);

    let pool_members = members
        .iter()
        .map(|member| {
            let pickup_order = stops
                .iter()
                .position(|(kind, candidate, _)| {
                    *kind == StopKind::Pickup && candidate.match_id == member.match_id
                })
                .unwrap_or(0) as i32;
            let dropoff_order = stops
                .iter()
                .position(|(kind, candidate, _)| {
                    *kind == StopKind::Dropoff && candidate.match_id == member.match_id
                })
                .unwrap_or(0) as i32;
            PoolMember {
                match_id: member.match_id.clone(),
                rider_id: member.rider_id.clone(),
                pickup_order,
                dropoff_order,
            }
        })
        .collect::<Vec<_>>();

    let total_score: f64 = members.iter().map(|member| member.score).sum();
    let ordered_stops = stops
        .into_iter()
        .map(|(kind, candidate, location)| PoolStop {
            kind,
            rider_id: candidate.rider_id.clone(),
            location,
        })
        .collect::<Vec<_>>();

    Some(PoolAssignment {
        driver_trip_id: driver_trip.id.clone(),
        avg_score: total_score / members.len() as f64,
        total_score,
        seats_used,
        seats_remaining: total_seats - seats_used,
        total_detour_minutes: total_detour,
        ordered_stops,
        members: pool_members,
        status: PoolStatus::Proposed,
    })
}

/// Nearest-neighbour tour over pickups and dropoffs. A dropoff only becomes
/// eligible once its pickup has been visited.
fn order_stops<'a>(
    start: Point,
    members: &[&'a PoolCandidate],
) -> Vec<(StopKind, &'a PoolCandidate, Location)> {
    let mut remaining: Vec<(StopKind, &PoolCandidate)> = members
        .iter()
        .flat_map(|member| {
            [(StopKind::Pickup, *member), (StopKind::Dropoff, *member)]
        })
        .collect();
    let mut visited_pickups: HashSet<String> = HashSet::new();

    let mut current = start;
    let mut tour = Vec::new();
    while !remaining.is_empty() {
        let mut best: Option<(usize, f64)> = None;
        for (index, (kind, candidate)) in remaining.iter().enumerate() {
            if *kind == StopKind::Dropoff
                && !visited_pickups.contains(&candidate.match_id.raw())
            {
                continue;
            }
            let location = match kind {
                StopKind::Pickup => &candidate.pickup,
                StopKind::Dropoff => &candidate.dropoff,
            };
            let distance = geo::haversine_km(current, location.point());
            if best.map(|(_, d)| distance < d).unwrap_or(true) {
                best = Some((index, distance));
            }
        }
        // there is always at least one eligible pickup while stops remain
        let Some((index, _)) = best else { break };
        let (kind, candidate) = remaining.remove(index);
        let location = match kind {
            StopKind::Pickup => candidate.pickup.clone(),
            StopKind::Dropoff => candidate.dropoff.clone(),
        };
        if kind == StopKind::Pickup {
            visited_pickups.insert(candidate.match_id.raw());
        }
        current = location.point();
        tour.push((kind, candidate, location));
    }
    tour
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use model::{rider_request::RiderPreferences, trip::Vehicle};

    use super::*;

    fn departure() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 7, 30, 0).unwrap()
    }

    fn offer(id: &str, origin: (f64, f64), destination: (f64, f64)) -> WithId<DriverTrip> {
        let origin = Location::new(origin.0, origin.1);
        let destination = Location::new(destination.0, destination.1);
        let bbox = DriverTrip::bounding_box_for(&origin, &destination, 5.0);
        WithId::new(
            Id::new(id.to_owned()),
            DriverTrip {
                driver_id: Id::new(format!("driver-{}", id)),
                origin,
                destination,
                bbox,
                departure_time: departure(),
                arrival_time: None,
                total_seats: 4,
                available_seats: 4,
                price_per_seat: 40.0,
                currency: "zar".to_owned(),
                vehicle: Vehicle::default(),
                status: model::driver_trip::OfferStatus::Offered,
                polyline: None,
                driver_rating: Some(4.8),
                organization_id: None,
                created_at: departure() - Duration::hours(2),
            },
        )
    }

    fn request() -> RiderRequest {
        RiderRequest {
            rider_id: Id::new("rider-1".to_owned()),
            pickup: Location::new(-26.195, 28.052),
            dropoff: Location::new(-26.112, 28.061),
            earliest_departure: departure() - Duration::minutes(15),
            latest_departure: departure() + Duration::minutes(15),
            seats_needed: 1,
            preferences: RiderPreferences::default(),
            status: model::rider_request::RequestStatus::Pending,
            matched_trip_id: None,
            organization_id: None,
            created_at: departure() - Duration::hours(1),
        }
    }

    fn corridor_offer(id: &str) -> WithId<DriverTrip> {
        offer(id, (-26.20, 28.05), (-26.11, 28.06))
    }

    #[test]
    fn corridor_driver_matches_with_small_detour() {
        let outcome =
            rank_candidates(&request(), vec![corridor_offer("d1")], &MatchConfig::default());
        assert_eq!(outcome.ranked.len(), 1);
        let best = &outcome.ranked[0];
        assert!(best.detour_minutes <= 10.0, "got {}", best.detour_minutes);
        assert!(best.pickup_distance_km <= 0.5, "got {}", best.pickup_distance_km);
        assert!(best.explanation.contains("detour"));
    }

    #[test]
    fn departure_outside_window_is_dropped_with_reason() {
        let mut late = corridor_offer("d1");
        late.content.departure_time = departure() + Duration::hours(2);
        let outcome = rank_candidates(&request(), vec![late], &MatchConfig::default());
        assert!(outcome.ranked.is_empty());
        assert_eq!(outcome.stats.time_window, 1);
    }

    #[test]
    fn time_slack_admits_early_departures() {
        let mut early = corridor_offer("d1");
        // 20 minutes before the window opens, inside the 30 minute slack
        early.content.departure_time = departure() - Duration::minutes(35);
        let outcome = rank_candidates(&request(), vec![early], &MatchConfig::default());
        assert_eq!(outcome.ranked.len(), 1);
    }

    #[test]
    fn far_corridor_is_dropped_on_pickup_distance() {
        let outcome = rank_candidates(
            &request(),
            vec![offer("d1", (-25.70, 27.50), (-25.60, 27.40))],
            &MatchConfig::default(),
        );
        assert!(outcome.ranked.is_empty());
        assert_eq!(outcome.stats.pickup_distance, 1);
    }

    #[test]
    fn full_offer_is_dropped_on_seats() {
        let mut full = corridor_offer("d1");
        full.content.available_seats = 0;
        let outcome = rank_candidates(&request(), vec![full], &MatchConfig::default());
        assert_eq!(outcome.stats.seats, 1);
    }

    #[test]
    fn low_rated_driver_is_dropped_when_rider_requires_more() {
        let mut rated = corridor_offer("d1");
        rated.content.driver_rating = Some(3.0);
        let mut req = request();
        req.preferences.min_driver_rating = Some(4.0);
        let outcome = rank_candidates(&req, vec![rated], &MatchConfig::default());
        assert_eq!(outcome.stats.rating, 1);
    }

    #[test]
    fn strict_org_preference_drops_other_orgs() {
        let mut req = request();
        req.organization_id = Some("acme".to_owned());
        req.preferences.same_org = OrgPreference::Strict;
        let other = corridor_offer("d1");
        let mut same = corridor_offer("d2");
        same.content.organization_id = Some("acme".to_owned());
        let outcome =
            rank_candidates(&req, vec![other, same], &MatchConfig::default());
        assert_eq!(outcome.ranked.len(), 1);
        assert_eq!(outcome.ranked[0].driver_trip.id.raw(), "d2");
        assert_eq!(outcome.stats.organization, 1);
    }

    #[test]
    fn wheelchair_need_requires_accessible_vehicle() {
        let mut req = request();
        req.preferences.wheelchair_needed = true;
        let mut accessible = corridor_offer("d2");
        accessible.content.vehicle.wheelchair_accessible = true;
        let outcome = rank_candidates(
            &req,
            vec![corridor_offer("d1"), accessible],
            &MatchConfig::default(),
        );
        assert_eq!(outcome.ranked.len(), 1);
        assert_eq!(outcome.ranked[0].driver_trip.id.raw(), "d2");
        assert_eq!(outcome.stats.accessibility, 1);
    }

    #[test]
    fn better_corridor_ranks_first_and_output_is_deterministic() {
        // d2's route passes closer to the rider
        let offers = || {
            vec![
                offer("d1", (-26.22, 28.00), (-26.10, 28.02)),
                corridor_offer("d2"),
            ]
        };
        let config = MatchConfig {
            max_pickup_distance_km: 5.0,
            max_dropoff_distance_km: 5.0,
            ..MatchConfig::default()
        };
        let first = rank_candidates(&request(), offers(), &config);
        let second = rank_candidates(&request(), offers(), &config);
        assert_eq!(first.ranked[0].driver_trip.id.raw(), "d2");
        let order = |outcome: &EngineOutcome| {
            outcome
                .ranked
                .iter()
                .map(|candidate| candidate.driver_trip.id.raw())
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&first), order(&second));
        let scores = |outcome: &EngineOutcome| {
            outcome
                .ranked
                .iter()
                .map(|candidate| candidate.score)
                .collect::<Vec<_>>()
        };
        assert_eq!(scores(&first), scores(&second));
    }

    #[test]
    fn candidate_cap_is_enforced() {
        let config = MatchConfig {
            max_candidates: 3,
            max_results: 10,
            ..MatchConfig::default()
        };
        let offers = (0..10)
            .map(|i| corridor_offer(&format!("d{}", i)))
            .collect::<Vec<_>>();
        let outcome = rank_candidates(&request(), offers, &config);
        assert_eq!(outcome.considered, 3);
    }

    fn pool_candidate(id: &str, pickup: (f64, f64), dropoff: (f64, f64), seats: i32, score: f64) -> PoolCandidate {
        PoolCandidate {
            match_id: Id::new(format!("match-{}", id)),
            rider_id: Id::new(format!("rider-{}", id)),
            pickup: Location::new(pickup.0, pickup.1),
            dropoff: Location::new(dropoff.0, dropoff.1),
            seats,
            score,
            detour_minutes: 4.0,
        }
    }

    #[test]
    fn pool_admits_riders_up_to_seat_budget() {
        let driver = corridor_offer("d1");
        let candidates = vec![
            pool_candidate("a", (-26.195, 28.052), (-26.112, 28.061), 2, 0.2),
            pool_candidate("b", (-26.185, 28.054), (-26.120, 28.060), 2, 0.3),
            pool_candidate("c", (-26.175, 28.056), (-26.125, 28.058), 2, 0.4),
        ];
        let pool = assemble_pool(&driver, &candidates, &MatchConfig::default())
            .expect("pool");
        assert_eq!(pool.seats_used, 4);
        assert_eq!(pool.seats_remaining, 0);
        assert_eq!(pool.members.len(), 2);
        // lowest scores won the seats
        assert!(pool
            .members
            .iter()
            .any(|member| member.match_id.raw() == "match-a"));
        assert!(pool
            .members
            .iter()
            .any(|member| member.match_id.raw() == "match-b"));
    }

    #[test]
    fn pool_respects_detour_budget() {
        let driver = corridor_offer("d1");
        let mut expensive =
            pool_candidate("a", (-26.195, 28.052), (-26.112, 28.061), 1, 0.2);
        expensive.detour_minutes = 24.0;
        let cheap = pool_candidate("b", (-26.185, 28.054), (-26.120, 28.060), 1, 0.3);
        let pool = assemble_pool(
            &driver,
            &[expensive, cheap],
            &MatchConfig::default(),
        )
        .expect("pool");
        // admitting both would blow the 25 minute pool budget
        assert_eq!(pool.members.len(), 1);
        assert!(pool.total_detour_minutes <= 25.0);
    }

    #[test]
    fn every_pickup_precedes_its_dropoff() {
        let driver = corridor_offer("d1");
        let candidates = vec![
            pool_candidate("a", (-26.195, 28.052), (-26.112, 28.061), 1, 0.2),
            pool_candidate("b", (-26.185, 28.054), (-26.120, 28.060), 1, 0.3),
            pool_candidate("c", (-26.175, 28.056), (-26.125, 28.058), 1, 0.4),
        ];
        let pool = assemble_pool(&driver, &candidates, &MatchConfig::default())
            .expect("pool");
        assert_eq!(pool.seats_used, 3);
        assert_eq!(pool.ordered_stops.len(), 6);
        for member in &pool.members {
            assert!(
                member.pickup_order < member.dropoff_order,
                "rider {} dropped off before pickup",
                member.rider_id
            );
        }
    }

    #[test]
    fn empty_candidate_list_builds_no_pool() {
        let driver = corridor_offer("d1");
        assert!(assemble_pool(&driver, &[], &MatchConfig::default()).is_none());
    }
}
