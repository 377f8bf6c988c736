use ahash::HashMap;
use geo::{CoordsIter, MultiPolygon};

use crate::{
    filters::FilterState,
    models::{Category, CulturalSite, District, LatLng, LngLat, ParkingLot, ParkingType},
    parking::NearbyParking,
};

const FALLBACK_ICON: &str = "marker";
const FALLBACK_COLOR: &str = "#6b7280";

fn category_style(category: Category) -> (&'static str, &'static str) {
    match category {
        Category::Theatre => ("theater", "#8b5cf6"),
        Category::Museum => ("museum", "#3b82f6"),
        Category::Restaurant => ("restaurant", "#f59e0b"),
        Category::Artwork => ("art-gallery", "#ec4899"),
        Category::Unknown => (FALLBACK_ICON, FALLBACK_COLOR),
    }
}

fn parking_style(parking_type: ParkingType) -> (&'static str, &'static str) {
    match parking_type {
        ParkingType::Bus => ("bus", "#0ea5e9"),
        ParkingType::Caravan => ("caravan", "#22c55e"),
        ParkingType::Car => ("car", "#1d4ed8"),
        ParkingType::Bicycle => ("bicycle", "#14b8a6"),
        ParkingType::Unknown => ("parking", FALLBACK_COLOR),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Site,
    Parking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: String,
    pub kind: MarkerKind,
    pub position: LatLng,
    pub label: String,
    pub icon: &'static str,
    pub color: &'static str,
}

impl Marker {
    /// `None` for sites without a usable location
    pub fn for_site(site: &CulturalSite) -> Option<Self> {
        let (icon, color) = category_style(site.category);
        Some(Self {
            id: site.id.clone(),
            kind: MarkerKind::Site,
            position: site.lng_lat()?.to_lat_lng(),
            label: site.name.clone(),
            icon,
            color,
        })
    }

    pub fn for_lot(lot: &ParkingLot) -> Option<Self> {
        let (icon, color) = parking_style(lot.parking_type);
        let label = match lot.capacity {
            Some(capacity) => format!("{} ({capacity} spaces)", lot.name),
            None => lot.name.clone(),
        };
        Some(Self {
            id: lot.id.clone(),
            kind: MarkerKind::Parking,
            position: lot.lng_lat()?.to_lat_lng(),
            label,
            icon,
            color,
        })
    }
}

/// A district boundary in map order, one ring list per polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictOutline {
    pub id: String,
    pub name: String,
    pub rings: Vec<Vec<LatLng>>,
    pub selected: bool,
}

impl DistrictOutline {
    pub fn new(district: &District, selected: Option<&str>) -> Option<Self> {
        let polygons = district.polygons()?;
        Some(Self {
            id: district.id.clone(),
            name: district.display_name().to_string(),
            rings: rings(&polygons),
            selected: selected.is_some_and(|s| district.matches(s)),
        })
    }
}

fn rings(polygons: &MultiPolygon<f64>) -> Vec<Vec<LatLng>> {
    polygons
        .0
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .map(|ring| {
            ring.coords_iter()
                .map(|c| LngLat::new(c.x, c.y).to_lat_lng())
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionLine {
    pub from: LatLng,
    pub to: LatLng,
    pub distance_m: f64,
}

/// Everything the map shows for the current data and filters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapScene {
    pub markers: Vec<Marker>,
    pub districts: Vec<DistrictOutline>,
    pub connections: Vec<ConnectionLine>,
}

impl MapScene {
    /// Builds the scene from whatever has loaded so far; any input may still be empty.
    pub fn build(
        filters: &FilterState,
        sites: &[CulturalSite],
        lots: &[ParkingLot],
        districts: &[District],
        nearby: Option<&NearbyParking>,
    ) -> Self {
        let mut scene = MapScene::default();
        let shown_sites = filters.filter_sites(sites, districts);

        if filters.layers.sites {
            scene
                .markers
                .extend(shown_sites.iter().copied().filter_map(Marker::for_site));
        }

        if filters.layers.parking {
            let nearby_lots = nearby.map(|n| n.parking_lots.as_slice()).unwrap_or_default();
            let mut seen = ahash::HashSet::default();
            for lot in lots.iter().chain(nearby_lots) {
                if filters.allows_lot(lot) && seen.insert(lot.id.as_str()) {
                    scene.markers.extend(Marker::for_lot(lot));
                }
            }
        }

        if filters.layers.districts {
            scene.districts = districts
                .iter()
                .filter_map(|d| DistrictOutline::new(d, filters.district.as_deref()))
                .collect();
        }

        if let (true, Some(nearby)) = (filters.layers.connections, nearby) {
            let site_positions = shown_sites
                .iter()
                .filter_map(|s| Some((s.id.as_str(), s.lng_lat()?.to_lat_lng())))
                .collect::<HashMap<_, _>>();
            let lot_positions = nearby
                .parking_lots
                .iter()
                .filter(|lot| filters.allows_lot(lot))
                .filter_map(|l| Some((l.id.as_str(), l.lng_lat()?.to_lat_lng())))
                .collect::<HashMap<_, _>>();

            scene.connections = nearby
                .connections
                .iter()
                .filter_map(|c| {
                    Some(ConnectionLine {
                        from: *site_positions.get(c.site_id.as_str())?,
                        to: *lot_positions.get(c.parking_id.as_str())?,
                        distance_m: c.distance_m,
                    })
                })
                .collect();
        }

        scene
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        filters::LayerToggles,
        parking::{
            tests::{lot, site},
            ParkingConnection,
        },
    };

    use super::*;

    fn district() -> District {
        serde_json::from_value(json!({
            "id": "d1",
            "name": "Zentrum",
            "properties": { "STADTTNAME": "Zentrum" },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[12.9, 50.8], [13.0, 50.8], [13.0, 50.9], [12.9, 50.8]]]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_marker_swaps_coordinates() {
        let marker = Marker::for_site(&site("a", Some((12.92, 50.83)))).unwrap();
        assert_eq!(marker.position, LatLng { lat: 50.83, lng: 12.92 });
        assert_eq!(marker.icon, "museum");
        assert!(Marker::for_site(&site("b", None)).is_none());
    }

    #[test]
    fn test_unknown_values_use_fallback_style() {
        let mut odd = site("a", Some((12.92, 50.83)));
        odd.category = Category::Unknown;
        let marker = Marker::for_site(&odd).unwrap();
        assert_eq!(marker.icon, FALLBACK_ICON);
        assert_eq!(marker.color, FALLBACK_COLOR);

        let marker = Marker::for_lot(&lot("p", ParkingType::Unknown, (12.9, 50.8))).unwrap();
        assert_eq!(marker.color, FALLBACK_COLOR);
        assert_eq!(marker.label, "lot p (12 spaces)");
    }

    #[test]
    fn test_district_outline() {
        let outline = DistrictOutline::new(&district(), Some("ZENTRUM")).unwrap();
        assert!(outline.selected);
        assert_eq!(outline.rings.len(), 1);
        assert_eq!(outline.rings[0][1], LatLng { lat: 50.8, lng: 13.0 });
    }

    #[test]
    fn test_scene_honours_layers() {
        let sites = [site("a", Some((12.92, 50.83)))];
        let lots = [lot("p", ParkingType::Car, (12.93, 50.83))];
        let nearby = NearbyParking {
            parking_lots: vec![lot("p", ParkingType::Car, (12.93, 50.83))],
            connections: vec![ParkingConnection {
                site_id: "a".to_string(),
                parking_id: "p".to_string(),
                distance_m: 700.0,
            }],
        };

        let mut filters = FilterState::default();
        let scene = MapScene::build(&filters, &sites, &lots, &[district()], Some(&nearby));
        // the shared lot is drawn once
        assert_eq!(scene.markers.len(), 2);
        assert_eq!(scene.districts.len(), 1);
        assert!(scene.connections.is_empty());

        filters.layers = LayerToggles {
            sites: false,
            parking: false,
            districts: false,
            connections: true,
        };
        let scene = MapScene::build(&filters, &sites, &lots, &[district()], Some(&nearby));
        assert!(scene.markers.is_empty());
        assert!(scene.districts.is_empty());
        assert_eq!(scene.connections.len(), 1);
        assert_eq!(scene.connections[0].distance_m, 700.0);
        assert_eq!(scene.connections[0].from, LatLng { lat: 50.83, lng: 12.92 });
    }

    #[test]
    fn test_partial_data() {
        let scene = MapScene::build(&FilterState::default(), &[], &[], &[], None);
        assert_eq!(scene, MapScene::default());
    }
}
