use std::{collections::BTreeSet, fmt, str::FromStr};

use crate::{
    api::{ParkingQuery, SearchFilters, SiteQuery},
    models::{Category, CulturalSite, District, ParkingLot, ParkingType},
    parking::NearbyOptions,
};

/// Which upstream dataset to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceType {
    #[default]
    All,
    Chemnitz,
    Sachsen,
}

impl SourceType {
    /// value of the `source` query parameter, `All` sends none
    pub fn as_param(&self) -> Option<&'static str> {
        match self {
            SourceType::All => None,
            SourceType::Chemnitz => Some("chemnitz_geojson"),
            SourceType::Sachsen => Some("sachsen_geojson"),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::All => write!(f, "all"),
            SourceType::Chemnitz => write!(f, "chemnitz"),
            SourceType::Sachsen => write!(f, "sachsen"),
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(SourceType::All),
            "chemnitz" | "chemnitz_geojson" => Ok(SourceType::Chemnitz),
            "sachsen" | "sachsen_geojson" => Ok(SourceType::Sachsen),
            _ => Err(format!("unknown source {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerToggles {
    pub sites: bool,
    pub parking: bool,
    pub districts: bool,
    /// lines from each site to its nearby parking
    pub connections: bool,
}

impl Default for LayerToggles {
    fn default() -> Self {
        Self {
            sites: true,
            parking: true,
            districts: true,
            connections: false,
        }
    }
}

/// The user's current filter choices.
///
/// An empty category or parking type set means "everything". A single selected category is
/// sent to the backend, several are applied locally since the backend filters by one only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterState {
    pub search: String,
    pub source: SourceType,
    pub district: Option<String>,
    pub categories: BTreeSet<Category>,
    pub parking_types: BTreeSet<ParkingType>,
    pub layers: LayerToggles,
}

fn single<T: Copy>(set: &BTreeSet<T>) -> Option<T> {
    match set.len() {
        1 => set.iter().next().copied(),
        _ => None,
    }
}

/// inserts `value` if missing, removes it otherwise; returns whether it's now selected
fn toggle<T: Ord>(set: &mut BTreeSet<T>, value: T) -> bool {
    if set.remove(&value) {
        false
    } else {
        set.insert(value)
    }
}

impl FilterState {
    pub fn toggle_category(&mut self, category: Category) -> bool {
        toggle(&mut self.categories, category)
    }

    pub fn toggle_parking_type(&mut self, parking_type: ParkingType) -> bool {
        toggle(&mut self.parking_types, parking_type)
    }

    pub fn set_district(&mut self, district: Option<&str>) {
        self.district = district
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
    }

    fn search_param(&self) -> Option<String> {
        let search = self.search.trim();
        (!search.is_empty()).then(|| search.to_string())
    }

    pub fn to_site_query(&self) -> SiteQuery {
        SiteQuery {
            search: self.search_param(),
            category: single(&self.categories),
            source: self.source.as_param().map(str::to_string),
            district: self.district.clone(),
            ..Default::default()
        }
    }

    pub fn to_parking_query(&self) -> ParkingQuery {
        ParkingQuery {
            parking_type: single(&self.parking_types),
            district: self.district.clone(),
            ..Default::default()
        }
    }

    pub fn to_search_filters(&self) -> SearchFilters {
        SearchFilters {
            category: single(&self.categories),
            district: self.district.clone(),
            source: self.source.as_param().map(str::to_string),
            ..Default::default()
        }
    }

    pub fn nearby_options(&self, radius_km: f64) -> NearbyOptions {
        NearbyOptions {
            radius_km,
            parking_types: (!self.parking_types.is_empty())
                .then(|| self.parking_types.iter().copied().collect()),
        }
    }

    pub fn allows_site(&self, site: &CulturalSite) -> bool {
        let category = self.categories.is_empty() || self.categories.contains(&site.category);
        let source = match self.source.as_param() {
            None => true,
            Some(param) => site.source.as_deref() == Some(param),
        };
        category && source
    }

    pub fn allows_lot(&self, lot: &ParkingLot) -> bool {
        self.parking_types.is_empty() || self.parking_types.contains(&lot.parking_type)
    }

    /// Sites passing the local filters.
    ///
    /// With a district selected, sites outside its boundary are dropped as well, if the
    /// district is among `districts` and has a usable geometry.
    pub fn filter_sites<'a>(
        &self,
        sites: &'a [CulturalSite],
        districts: &[District],
    ) -> Vec<&'a CulturalSite> {
        let boundary = self.district.as_deref().and_then(|selected| {
            districts
                .iter()
                .find(|d| d.matches(selected))
                .and_then(District::polygons)
        });

        sites
            .iter()
            .filter(|site| self.allows_site(site))
            .filter(|site| match (&boundary, site.lng_lat()) {
                (None, _) => true,
                (Some(boundary), Some(location)) => {
                    geo::Contains::contains(boundary, &geo::Point::from(location))
                }
                (Some(_), None) => false,
            })
            .collect()
    }

    pub fn filter_lots<'a>(&self, lots: &'a [ParkingLot]) -> Vec<&'a ParkingLot> {
        lots.iter().filter(|lot| self.allows_lot(lot)).collect()
    }
}

/// At most one dropdown is open at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenPanel {
    #[default]
    None,
    Categories,
    ParkingTypes,
    Districts,
    Sources,
    Layers,
    UserMenu,
}

impl OpenPanel {
    /// opens `panel`, or closes it if it's the one already open
    pub fn toggle(&mut self, panel: OpenPanel) {
        *self = if *self == panel {
            OpenPanel::None
        } else {
            panel
        };
    }

    pub fn close(&mut self) {
        *self = OpenPanel::None;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::parking::tests::{lot, site};

    use super::*;

    fn theatre(id: &str, location: (f64, f64), source: &str) -> CulturalSite {
        CulturalSite {
            category: Category::Theatre,
            source: Some(source.to_string()),
            ..site(id, Some(location))
        }
    }

    #[test]
    fn test_default_filters_send_nothing() {
        let filters = FilterState::default();
        assert_eq!(filters.to_site_query(), SiteQuery::default());
        assert_eq!(filters.to_parking_query(), ParkingQuery::default());
        assert_eq!(filters.nearby_options(1.0), NearbyOptions::default());
    }

    #[test]
    fn test_single_category_goes_to_backend() {
        let mut filters = FilterState {
            search: "  oper ".to_string(),
            source: SourceType::Chemnitz,
            ..Default::default()
        };
        filters.toggle_category(Category::Theatre);
        filters.set_district(Some(" Zentrum "));

        let query = filters.to_site_query();
        assert_eq!(query.search.as_deref(), Some("oper"));
        assert_eq!(query.category, Some(Category::Theatre));
        assert_eq!(query.source.as_deref(), Some("chemnitz_geojson"));
        assert_eq!(query.district.as_deref(), Some("Zentrum"));

        filters.toggle_category(Category::Museum);
        assert_eq!(filters.to_site_query().category, None);
        assert_eq!(filters.to_search_filters().category, None);
    }

    #[test]
    fn test_toggles() {
        let mut filters = FilterState::default();
        assert!(filters.toggle_parking_type(ParkingType::Bus));
        assert_eq!(filters.to_parking_query().parking_type, Some(ParkingType::Bus));
        assert!(!filters.toggle_parking_type(ParkingType::Bus));
        assert!(filters.parking_types.is_empty());

        filters.set_district(Some("  "));
        assert_eq!(filters.district, None);
    }

    #[test]
    fn test_local_filtering() {
        let mut filters = FilterState::default();
        filters.toggle_category(Category::Theatre);
        filters.toggle_category(Category::Artwork);
        filters.source = SourceType::Sachsen;

        let sites = [
            theatre("t1", (12.92, 50.83), "sachsen_geojson"),
            theatre("t2", (12.92, 50.83), "chemnitz_geojson"),
            site("m1", Some((12.92, 50.83))),
        ];
        let kept = filters.filter_sites(&sites, &[]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "t1");

        filters.toggle_parking_type(ParkingType::Caravan);
        let lots = [
            lot("c", ParkingType::Caravan, (12.9, 50.8)),
            lot("b", ParkingType::Bus, (12.9, 50.8)),
        ];
        let kept = filters.filter_lots(&lots);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "c");
        assert_eq!(
            filters.nearby_options(2.0).parking_types,
            Some(vec![ParkingType::Caravan])
        );
    }

    #[test]
    fn test_district_boundary_filter() {
        let district: District = serde_json::from_value(json!({
            "_id": "d1",
            "name": "Zentrum",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[12.9, 50.8], [13.0, 50.8], [13.0, 50.9], [12.9, 50.9], [12.9, 50.8]]]
            }
        }))
        .unwrap();

        let mut filters = FilterState::default();
        filters.set_district(Some("zentrum"));

        let sites = [
            site("inside", Some((12.95, 50.85))),
            site("outside", Some((13.5, 50.85))),
            site("nowhere", None),
        ];
        let kept = filters.filter_sites(&sites, &[district]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "inside");

        // unknown district geometry keeps everything
        assert_eq!(filters.filter_sites(&sites, &[]).len(), 3);
    }

    #[test]
    fn test_source_from_str() {
        assert_eq!("".parse::<SourceType>().unwrap(), SourceType::All);
        assert_eq!("Sachsen".parse::<SourceType>().unwrap(), SourceType::Sachsen);
        assert_eq!(
            "chemnitz_geojson".parse::<SourceType>().unwrap(),
            SourceType::Chemnitz
        );
        assert!("berlin".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_one_panel_open() {
        let mut panel = OpenPanel::default();
        panel.toggle(OpenPanel::Categories);
        assert_eq!(panel, OpenPanel::Categories);
        panel.toggle(OpenPanel::Layers);
        assert_eq!(panel, OpenPanel::Layers);
        panel.toggle(OpenPanel::Layers);
        assert_eq!(panel, OpenPanel::None);
        panel.toggle(OpenPanel::UserMenu);
        panel.close();
        assert_eq!(panel, OpenPanel::None);
    }
}
