//! Route safety scoring.
//!
//! A route is sampled at the start vertex of every segment. A sample is
//! covered when at least one CCTV camera or store lies within
//! [`COVERAGE_RADIUS_M`]; every path vertex is also checked against the
//! caution zones. The final score mixes coverage, distinct asset counts and
//! the caution-zone penalty, and maps to a letter grade.

use std::collections::HashSet;

use shared::SafetyGrade;

use crate::{
    geo::distance_meters,
    models::{Coordinate, RoutePath, SafetyAsset, SafetyResult},
    zones::ZonePredicate,
};

pub const COVERAGE_RADIUS_M: f64 = 50.0;

const COVERAGE_WEIGHT: f64 = 0.2;
const CCTV_POINTS: f64 = 5.0;
const MAX_CCTV_POINTS: f64 = 20.0;
const STORE_POINTS: f64 = 3.0;
const MAX_STORE_POINTS: f64 = 10.0;
const FLAGGED_POINT_PENALTY: f64 = 20.0;
const MAX_FLAGGED_PENALTY: f64 = 100.0;
const FLAGGED_RATIO_THRESHOLD: f64 = 0.3;
const FLAGGED_RATIO_PENALTY: f64 = 50.0;

pub fn grade_for(score: f64) -> SafetyGrade {
    if score >= 40.0 {
        SafetyGrade::A
    } else if score >= 30.0 {
        SafetyGrade::B
    } else if score >= 20.0 {
        SafetyGrade::C
    } else {
        SafetyGrade::D
    }
}

/// Assets seen near the path, each counted once by exact position.
#[derive(Default)]
struct NearbyTracker {
    seen: HashSet<(u64, u64)>,
    assets: Vec<SafetyAsset>,
}

impl NearbyTracker {
    fn record(&mut self, asset: &SafetyAsset) {
        let key = (
            asset.location.latitude.to_bits(),
            asset.location.longitude.to_bits(),
        );
        if self.seen.insert(key) {
            self.assets.push(asset.clone());
        }
    }

    fn count(&self) -> usize {
        self.assets.len()
    }
}

/// Record every asset within range of `point`; true if any was.
fn mark_nearby(point: Coordinate, assets: &[SafetyAsset], tracker: &mut NearbyTracker) -> bool {
    let mut covered = false;
    for asset in assets {
        if distance_meters(point, asset.location) <= COVERAGE_RADIUS_M {
            tracker.record(asset);
            covered = true;
        }
    }
    covered
}

pub fn score_route(
    path: &RoutePath,
    cctvs: &[SafetyAsset],
    stores: &[SafetyAsset],
    zones: &dyn ZonePredicate,
) -> SafetyResult {
    let points = &path.coordinates;
    let total_segments = points.len().saturating_sub(1);

    let mut nearby_cctvs = NearbyTracker::default();
    let mut nearby_stores = NearbyTracker::default();
    let mut covered_segments = 0usize;

    for &point in &points[..total_segments] {
        // Both lists are always scanned so every asset in range is recorded.
        let near_cctv = mark_nearby(point, cctvs, &mut nearby_cctvs);
        let near_store = mark_nearby(point, stores, &mut nearby_stores);
        if near_cctv || near_store {
            covered_segments += 1;
        }
    }

    let coverage_ratio = if total_segments > 0 {
        (covered_segments as f64 / total_segments as f64 * 100.0).min(100.0)
    } else {
        0.0
    };

    let flagged_points = points.iter().filter(|p| zones.is_flagged(**p)).count();
    let flagged_ratio = if points.is_empty() {
        0.0
    } else {
        flagged_points as f64 / points.len() as f64
    };
    let mut penalty = -(flagged_points as f64 * FLAGGED_POINT_PENALTY).min(MAX_FLAGGED_PENALTY);
    if flagged_ratio >= FLAGGED_RATIO_THRESHOLD {
        penalty -= FLAGGED_RATIO_PENALTY;
    }

    let cctv_count = nearby_cctvs.count();
    let store_count = nearby_stores.count();
    let base = coverage_ratio * COVERAGE_WEIGHT
        + (cctv_count as f64 * CCTV_POINTS).min(MAX_CCTV_POINTS)
        + (store_count as f64 * STORE_POINTS).min(MAX_STORE_POINTS);
    let final_score = base + penalty;

    tracing::debug!(
        "scored route: {} vertices, coverage {:.1}%, {} cctv, {} stores, {} flagged, score {:.2}",
        points.len(),
        coverage_ratio,
        cctv_count,
        store_count,
        flagged_points,
        final_score
    );

    SafetyResult {
        grade: grade_for(final_score),
        coverage_ratio,
        cctv_count,
        store_count,
        flagged_points,
        final_score,
        nearby_cctvs: nearby_cctvs.assets,
        nearby_stores: nearby_stores.assets,
    }
}

/// Highest-scoring candidate. Ties keep the earlier one.
pub fn select_best<T>(candidates: impl IntoIterator<Item = T>, score: impl Fn(&T) -> f64) -> Option<T> {
    candidates.into_iter().fold(None, |best, candidate| match best {
        Some(current) if score(&candidate) <= score(&current) => Some(current),
        _ => Some(candidate),
    })
}
