use std::{fmt, str::FromStr};

use geo::{Contains, MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Coordinate pair in the order the backend stores and transmits it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

/// Coordinate pair in the order the map expects it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// the only place the boundary ordering is swapped for the map ordering
    pub fn to_lat_lng(self) -> LatLng {
        LatLng {
            lat: self.lat,
            lng: self.lng,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

impl LatLng {
    pub fn to_lng_lat(self) -> LngLat {
        LngLat {
            lng: self.lng,
            lat: self.lat,
        }
    }
}

impl From<LngLat> for Point<f64> {
    fn from(value: LngLat) -> Self {
        Point::new(value.lng, value.lat)
    }
}

/// GeoJSON point as the backend sends it: `{"type": "Point", "coordinates": [lng, lat]}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "point_type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

fn point_type() -> String {
    "Point".to_string()
}

impl GeoPoint {
    /// returns `None` when the point doesn't carry a usable coordinate pair
    pub fn lng_lat(&self) -> Option<LngLat> {
        match self.coordinates.as_slice() {
            [lng, lat, ..] => Some(LngLat::new(*lng, *lat)).filter(LngLat::is_valid),
            _ => None,
        }
    }
}

impl From<LngLat> for GeoPoint {
    fn from(value: LngLat) -> Self {
        Self {
            kind: point_type(),
            coordinates: vec![value.lng, value.lat],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Theatre,
    Museum,
    Restaurant,
    Artwork,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Theatre,
        Category::Museum,
        Category::Restaurant,
        Category::Artwork,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Theatre => "theatre",
            Category::Museum => "museum",
            Category::Restaurant => "restaurant",
            Category::Artwork => "artwork",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category {s}"))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParkingType {
    Bus,
    Caravan,
    Car,
    Bicycle,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ParkingType {
    pub const ALL: [ParkingType; 4] = [
        ParkingType::Bus,
        ParkingType::Caravan,
        ParkingType::Car,
        ParkingType::Bicycle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParkingType::Bus => "bus",
            ParkingType::Caravan => "caravan",
            ParkingType::Car => "car",
            ParkingType::Bicycle => "bicycle",
            ParkingType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ParkingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ParkingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParkingType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown parking type {s}"))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CulturalSite {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub opening_hours: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// upstream dataset, e.g. `chemnitz_geojson` or `sachsen_geojson`
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

impl CulturalSite {
    pub fn lng_lat(&self) -> Option<LngLat> {
        self.location.as_ref().and_then(GeoPoint::lng_lat)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParkingLot {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub parking_type: ParkingType,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub available_spots: Option<u32>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub daily_rate: Option<f64>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

impl ParkingLot {
    pub fn lng_lat(&self) -> Option<LngLat> {
        self.location.as_ref().and_then(GeoPoint::lng_lat)
    }
}

/// property keys the district import uses for the district name, in order of preference
const DISTRICT_NAME_KEYS: [&str; 3] = ["STADTTNAME", "name", "NAME"];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct District {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub geometry: Option<geojson::Geometry>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub cultural_sites_count: u64,
}

impl District {
    fn property_names(&self) -> impl Iterator<Item = &str> {
        DISTRICT_NAME_KEYS.iter().filter_map(move |key| {
            self.properties
                .as_ref()
                .and_then(|p| p.get(*key))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
        })
    }

    pub fn display_name(&self) -> &str {
        self.property_names().next().unwrap_or(self.name.as_str())
    }

    /// whether `selected` names this district, under any of its names
    pub fn matches(&self, selected: &str) -> bool {
        let selected = selected.trim();
        !selected.is_empty()
            && self
                .property_names()
                .chain(std::iter::once(self.name.as_str()))
                .any(|name| name.trim().eq_ignore_ascii_case(selected))
    }

    pub fn polygons(&self) -> Option<MultiPolygon<f64>> {
        let geometry = geo::Geometry::<f64>::try_from(self.geometry.clone()?).ok()?;
        match geometry {
            geo::Geometry::Polygon(polygon) => Some(MultiPolygon(vec![polygon])),
            geo::Geometry::MultiPolygon(polygons) => Some(polygons),
            _ => None,
        }
    }

    pub fn contains(&self, point: LngLat) -> bool {
        self.polygons()
            .map(|p| p.contains(&Point::from(point)))
            .unwrap_or(false)
    }
}

/// lightweight projection used only for autocomplete
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchSuggestion {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    #[serde(alias = "_id")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub access_token: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    pub user: User,
}

fn bearer() -> String {
    "bearer".to_string()
}

#[derive(Serialize, Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CategoryInfo {
    pub name: Category,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DistrictName {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct QuickStats {
    #[serde(default)]
    pub total_sites: u64,
    #[serde(default)]
    pub chemnitz_sites: u64,
    #[serde(default)]
    pub sachsen_sites: u64,
    #[serde(default)]
    pub total_parking: u64,
    #[serde(default)]
    pub total_districts: u64,
    #[serde(default)]
    pub sites_by_category: std::collections::BTreeMap<String, u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SitesPage {
    pub sites: Vec<CulturalSite>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub parking_lots: Option<Vec<ParkingLot>>,
    #[serde(default)]
    pub districts: Option<Vec<District>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Pagination {
    pub limit: u32,
    pub skip: u32,
    pub has_more: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Sorting {
    pub sort_by: String,
    pub sort_order: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FavoriteEntry {
    pub site_id: String,
    pub site_name: String,
    #[serde(default)]
    pub site_category: Category,
    #[serde(default)]
    pub site_address: Option<String>,
    pub favorited_at: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct FavoritesList {
    pub user_id: String,
    pub favorites: Vec<FavoriteEntry>,
    #[serde(default)]
    pub total_favorites: u64,
}

/// values the backend offers for the filter dropdowns
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct FilterValues {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub districts: Vec<String>,
    #[serde(default)]
    pub sort_options: Vec<String>,
    #[serde(default)]
    pub sort_orders: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_coordinate_swap_roundtrip() {
        for (lng, lat) in [(12.92, 50.83), (-180.0, -90.0), (180.0, 90.0), (0.0, 0.0)] {
            let p = LngLat::new(lng, lat);
            let swapped = p.to_lat_lng();
            assert_eq!(swapped.lat, lat);
            assert_eq!(swapped.lng, lng);
            assert_eq!(swapped.to_lng_lat(), p);
        }
    }

    #[test]
    fn test_site_from_backend_json() {
        let site: CulturalSite = serde_json::from_value(json!({
            "_id": "64f0",
            "name": "Opernhaus",
            "category": "theatre",
            "location": { "type": "Point", "coordinates": [12.9252, 50.8357] },
            "source": "chemnitz_geojson",
            "is_active": true,
        }))
        .unwrap();

        assert_eq!(site.id, "64f0");
        assert_eq!(site.category, Category::Theatre);
        assert_eq!(site.lng_lat(), Some(LngLat::new(12.9252, 50.8357)));
    }

    #[test]
    fn test_unknown_enum_values_dont_fail() {
        let site: CulturalSite = serde_json::from_value(json!({
            "id": "1",
            "name": "Kino",
            "category": "cinema",
        }))
        .unwrap();
        assert_eq!(site.category, Category::Unknown);
        assert_eq!(site.lng_lat(), None);

        let lot: ParkingLot = serde_json::from_value(json!({
            "id": "p1",
            "name": "Hangar",
            "parking_type": "helicopter",
        }))
        .unwrap();
        assert_eq!(lot.parking_type, ParkingType::Unknown);
    }

    #[test]
    fn test_unusable_locations() {
        let short = GeoPoint {
            kind: "Point".into(),
            coordinates: vec![12.9],
        };
        assert_eq!(short.lng_lat(), None);

        let out_of_range = GeoPoint::from(LngLat::new(12.9, 95.0));
        assert_eq!(out_of_range.lng_lat(), None);

        let nan = GeoPoint::from(LngLat::new(f64::NAN, 50.0));
        assert_eq!(nan.lng_lat(), None);
    }

    #[test]
    fn test_enum_from_str() {
        assert_eq!("Museum".parse::<Category>(), Ok(Category::Museum));
        assert!("unknown".parse::<Category>().is_err());
        assert_eq!(" bus ".parse::<ParkingType>(), Ok(ParkingType::Bus));
    }

    fn square_district() -> District {
        serde_json::from_value(json!({
            "_id": "d1",
            "name": "Zentrum",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[12.0, 50.0], [13.0, 50.0], [13.0, 51.0], [12.0, 51.0], [12.0, 50.0]]]
            },
            "properties": { "STADTTNAME": "Zentrum-Nord" }
        }))
        .unwrap()
    }

    #[test]
    fn test_district_names() {
        let district = square_district();
        assert_eq!(district.display_name(), "Zentrum-Nord");
        assert!(district.matches("zentrum-nord"));
        assert!(district.matches("Zentrum"));
        assert!(!district.matches("Kaßberg"));
        assert!(!district.matches("  "));

        let bare = District {
            id: "d2".into(),
            name: "Kaßberg".into(),
            geometry: None,
            properties: Some(Map::new()),
            cultural_sites_count: 0,
        };
        assert_eq!(bare.display_name(), "Kaßberg");
    }

    #[test]
    fn test_district_contains() {
        let district = square_district();
        assert!(district.contains(LngLat::new(12.5, 50.5)));
        assert!(!district.contains(LngLat::new(14.0, 50.5)));

        let no_geometry = District {
            geometry: None,
            ..square_district()
        };
        assert!(!no_geometry.contains(LngLat::new(12.5, 50.5)));
    }
}
