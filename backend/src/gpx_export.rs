use geo_types::Point;
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};

use crate::error::AppError;
use crate::geo::{format_distance, path_length_meters};
use crate::models::{Coordinate, SafetyAsset};
use crate::pipeline::RouteOutcome;

/// GPX 1.1 document with the route as a track and nearby safety assets as
/// waypoints.
pub fn encode_route_as_gpx(outcome: &RouteOutcome) -> Result<String, AppError> {
    let mut gpx = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some("saferoute".into()),
        ..Default::default()
    };
    let mut track = Track {
        name: Some(format!(
            "saferoute {} (grade {})",
            outcome.route_type,
            outcome.safety.grade.as_str()
        )),
        description: Some(format!(
            "{} via {:?}, score {:.1}",
            format_distance(path_length_meters(&outcome.path.coordinates)),
            outcome.search_option,
            outcome.safety.final_score
        )),
        ..Default::default()
    };

    let mut segment = TrackSegment::new();
    segment
        .points
        .extend(outcome.path.coordinates.iter().map(to_waypoint));
    track.segments.push(segment);
    gpx.tracks.push(track);

    gpx.waypoints.extend(
        outcome
            .safety
            .nearby_cctvs
            .iter()
            .chain(&outcome.safety.nearby_stores)
            .map(asset_waypoint),
    );

    let mut buffer = Vec::new();
    gpx::write(&gpx, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn to_waypoint(coord: &Coordinate) -> Waypoint {
    Waypoint::new(Point::new(coord.longitude, coord.latitude))
}

fn asset_waypoint(asset: &SafetyAsset) -> Waypoint {
    let mut waypoint = to_waypoint(&asset.location);
    waypoint.name = Some(
        asset
            .name
            .clone()
            .unwrap_or_else(|| asset.category.as_str().to_uppercase()),
    );
    waypoint.type_ = Some(asset.category.as_str().to_string());
    waypoint
}
