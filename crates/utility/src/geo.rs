use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude (and of longitude at the equator).
pub const KM_PER_DEGREE: f64 = 111.0;

const POLYLINE_PRECISION: f64 = 1e6;

fn to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Axis-aligned lat/lng rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, point: Point) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

pub fn haversine_km(a: Point, b: Point) -> f64 {
    let lat1_rad = to_radians(a.latitude);
    let lon1_rad = to_radians(a.longitude);
    let lat2_rad = to_radians(b.latitude);
    let lon2_rad = to_radians(b.longitude);

    let dlat = lat2_rad - lat1_rad;
    let dlon = lon2_rad - lon1_rad;

    let h = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Smallest axis-aligned rectangle containing all points, padded by `pad_km`.
/// The longitude pad widens with latitude so the padding stays `pad_km` wide
/// on the ground.
pub fn bounding_box(points: &[Point], pad_km: f64) -> BoundingBox {
    let mut min_lat = f64::INFINITY;
    let mut max_lat = f64::NEG_INFINITY;
    let mut min_lng = f64::INFINITY;
    let mut max_lng = f64::NEG_INFINITY;
    for point in points {
        min_lat = min_lat.min(point.latitude);
        max_lat = max_lat.max(point.latitude);
        min_lng = min_lng.min(point.longitude);
        max_lng = max_lng.max(point.longitude);
    }

    let mean_lat = (min_lat + max_lat) / 2.0;
    let lat_pad = pad_km / KM_PER_DEGREE;
    let lng_pad = pad_km / (KM_PER_DEGREE * to_radians(mean_lat).cos().abs().max(1e-9));

    BoundingBox {
        min_lat: min_lat - lat_pad,
        max_lat: max_lat + lat_pad,
        min_lng: min_lng - lng_pad,
        max_lng: max_lng + lng_pad,
    }
}

/// Great-circle distance from `point` to the segment `seg_start`..`seg_end`,
/// clamped to the endpoints.
///
/// The projection parameter is computed on a local equirectangular plane,
/// which is accurate for the segment lengths that occur in ride corridors.
pub fn perp_distance_km(point: Point, seg_start: Point, seg_end: Point) -> f64 {
    let mean_lat = to_radians((seg_start.latitude + seg_end.latitude) / 2.0);
    let scale = mean_lat.cos();

    let px = (point.longitude - seg_start.longitude) * scale;
    let py = point.latitude - seg_start.latitude;
    let ex = (seg_end.longitude - seg_start.longitude) * scale;
    let ey = seg_end.latitude - seg_start.latitude;

    let seg_len_sq = ex * ex + ey * ey;
    let t = if seg_len_sq <= f64::EPSILON {
        0.0
    } else {
        ((px * ex + py * ey) / seg_len_sq).clamp(0.0, 1.0)
    };

    let nearest = Point::new(
        seg_start.latitude + t * ey,
        seg_start.longitude + t * (seg_end.longitude - seg_start.longitude),
    );
    haversine_km(point, nearest)
}

/// Distance from `point` to the closest segment of `route`.
pub fn distance_to_route_km(point: Point, route: &[Point]) -> f64 {
    match route {
        [] => f64::INFINITY,
        [only] => haversine_km(point, *only),
        _ => route
            .windows(2)
            .map(|pair| perp_distance_km(point, pair[0], pair[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

pub fn route_length_km(route: &[Point]) -> f64 {
    route
        .windows(2)
        .map(|pair| haversine_km(pair[0], pair[1]))
        .sum()
}

/// Encodes a path in the Google polyline format at precision 6.
pub fn encode_polyline(points: &[Point]) -> String {
    let mut encoded = String::new();
    let mut prev_lat = 0i64;
    let mut prev_lng = 0i64;
    for point in points {
        let lat = (point.latitude * POLYLINE_PRECISION).round() as i64;
        let lng = (point.longitude * POLYLINE_PRECISION).round() as i64;
        encode_value(lat - prev_lat, &mut encoded);
        encode_value(lng - prev_lng, &mut encoded);
        prev_lat = lat;
        prev_lng = lng;
    }
    encoded
}

fn encode_value(value: i64, out: &mut String) {
    // zig-zag so small negative deltas stay short
    let mut value = if value < 0 { !(value << 1) } else { value << 1 };
    while value >= 0x20 {
        out.push((((0x20 | (value & 0x1f)) + 63) as u8) as char);
        value >>= 5;
    }
    out.push(((value + 63) as u8) as char);
}

/// Decodes a precision-6 polyline. Returns `None` on malformed input.
pub fn decode_polyline(encoded: &str) -> Option<Vec<Point>> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut index = 0;
    let mut lat = 0i64;
    let mut lng = 0i64;
    while index < bytes.len() {
        let (dlat, next) = decode_value(bytes, index)?;
        let (dlng, next) = decode_value(bytes, next)?;
        index = next;
        lat += dlat;
        lng += dlng;
        points.push(Point::new(
            lat as f64 / POLYLINE_PRECISION,
            lng as f64 / POLYLINE_PRECISION,
        ));
    }
    Some(points)
}

fn decode_value(bytes: &[u8], mut index: usize) -> Option<(i64, usize)> {
    let mut result = 0i64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(index)? as i64 - 63;
        if !(0..=0x3f).contains(&byte) {
            return None;
        }
        index += 1;
        result |= (byte & 0x1f) << shift;
        shift += 5;
        if byte < 0x20 {
            break;
        }
    }
    let value = if result & 1 == 1 {
        !(result >> 1)
    } else {
        result >> 1
    };
    Some((value, index))
}

/// Inserts `stop` into `route` at the position that adds the least length,
/// never before index `min_index`. Returns the insertion index.
pub fn insert_cheapest(route: &mut Vec<Point>, stop: Point, min_index: usize) -> usize {
    if route.is_empty() {
        route.push(stop);
        return 0;
    }
    let first = min_index.min(route.len());
    let mut best_index = route.len();
    let mut best_added = f64::INFINITY;
    for i in first..=route.len() {
        let added = match (i.checked_sub(1).and_then(|p| route.get(p)), route.get(i)) {
            (Some(&before), Some(&after)) => {
                haversine_km(before, stop) + haversine_km(stop, after)
                    - haversine_km(before, after)
            }
            (Some(&before), None) => haversine_km(before, stop),
            (None, Some(&after)) => haversine_km(stop, after),
            (None, None) => 0.0,
        };
        if added < best_added {
            best_added = added;
            best_index = i;
        }
    }
    route.insert(best_index, stop);
    best_index
}

/// Additional minutes a driver incurs by picking up and dropping off a rider.
///
/// The rider's pickup and dropoff are inserted into the driver's stop order by
/// nearest-neighbour insertion (dropoff constrained to come after pickup); the
/// detour is the added length at `avg_speed_km_h`.
pub fn detour_minutes(
    route: &[Point],
    pickup: Point,
    dropoff: Point,
    avg_speed_km_h: f64,
) -> f64 {
    if route.len() < 2 || avg_speed_km_h <= 0.0 {
        return 0.0;
    }
    let base_km = route_length_km(route);
    let mut extended = route.to_vec();
    let pickup_index = insert_cheapest(&mut extended, pickup, 1);
    insert_cheapest(&mut extended, dropoff, pickup_index + 1);
    let added_km = (route_length_km(&extended) - base_km).max(0.0);
    added_km / avg_speed_km_h * 60.0
}
