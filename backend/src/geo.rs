use crate::models::Coordinate;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters (Haversine). NaN inputs yield NaN.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    EARTH_RADIUS_M * central_angle(a, b)
}

pub fn path_length_meters(path: &[Coordinate]) -> f64 {
    path.windows(2).map(|w| distance_meters(w[0], w[1])).sum()
}

/// "850m" below one kilometer, "1.2km" above.
pub fn format_distance(meters: f64) -> String {
    if meters >= 1000.0 {
        format!("{:.1}km", meters / 1000.0)
    } else {
        format!("{}m", meters.round() as i64)
    }
}

fn central_angle(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * h.sqrt().clamp(0.0, 1.0).asin()
}
