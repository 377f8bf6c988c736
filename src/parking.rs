use ahash::HashSet;
use geo::{HaversineDistance, Point};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    api::{Backend, ParkingNearQuery},
    models::{CulturalSite, ParkingLot, ParkingType},
};

pub const DEFAULT_RADIUS_KM: f64 = 1.0;
/// nearby results requested per site
pub const PER_SITE_LIMIT: u32 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyOptions {
    pub radius_km: f64,
    /// `None` keeps every parking type
    pub parking_types: Option<Vec<ParkingType>>,
}

impl Default for NearbyOptions {
    fn default() -> Self {
        Self {
            radius_km: DEFAULT_RADIUS_KM,
            parking_types: None,
        }
    }
}

impl NearbyOptions {
    fn radius_m(&self) -> u32 {
        (self.radius_km.max(0.0) * 1000.0).round() as u32
    }

    fn allows(&self, parking_type: ParkingType) -> bool {
        self.parking_types
            .as_ref()
            .map_or(true, |types| types.contains(&parking_type))
    }
}

/// one (site, parking lot) pair found within the radius
#[derive(Debug, Clone, PartialEq)]
pub struct ParkingConnection {
    pub site_id: String,
    pub parking_id: String,
    pub distance_m: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NearbyParking {
    /// every lot exactly once, in the order it was first found
    pub parking_lots: Vec<ParkingLot>,
    pub connections: Vec<ParkingConnection>,
}

/// Finds the parking lots near any of `sites`.
///
/// This only enriches the map, so it never fails: sites without coordinates are skipped,
/// a failing per-site query is logged and skipped, and cancellation yields an empty result.
pub async fn find_parking_near_sites(
    backend: &dyn Backend,
    sites: &[CulturalSite],
    options: &NearbyOptions,
    cancel: &CancellationToken,
) -> NearbyParking {
    let mut result = NearbyParking::default();
    if sites.is_empty() {
        return result;
    }

    let mut seen = HashSet::default();
    let radius = options.radius_m();

    for site in sites {
        let Some(site_location) = site.lng_lat() else {
            debug!(site = %site.id, "skipping site without coordinates");
            continue;
        };

        let query =
            ParkingNearQuery::new(site_location.lat, site_location.lng, radius, PER_SITE_LIMIT);

        let lots = match backend.parking_near(&query, cancel).await {
            Ok(lots) => lots,
            Err(e) if e.is_cancelled() => return NearbyParking::default(),
            Err(e) => {
                warn!(site = %site.id, error = %e, "nearby parking lookup failed");
                continue;
            }
        };

        let site_point = Point::from(site_location);
        for lot in lots {
            if !options.allows(lot.parking_type) {
                continue;
            }
            let Some(lot_location) = lot.lng_lat() else {
                continue;
            };

            // the backend may apply its own, wider default radius
            let distance_m = site_point.haversine_distance(&Point::from(lot_location));
            if distance_m > f64::from(radius) {
                continue;
            }

            result.connections.push(ParkingConnection {
                site_id: site.id.clone(),
                parking_id: lot.id.clone(),
                distance_m,
            });

            if seen.insert(lot.id.clone()) {
                result.parking_lots.push(lot);
            }
        }
    }

    debug!(
        sites = sites.len(),
        parking_lots = result.parking_lots.len(),
        connections = result.connections.len(),
        "nearby parking collected"
    );

    result
}
