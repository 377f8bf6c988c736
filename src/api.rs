use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::ApiError,
    models::{
        AuthToken, Category, CategoryInfo, CulturalSite, Credentials, District, DistrictName,
        FavoritesList, FilterValues, Pagination, ParkingLot, ParkingType, QuickStats,
        Registration, SearchSuggestion, SitesPage, Sorting, User,
    },
};

#[cfg(test)]
use mockall::automock;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Query of `GET /api/cultural-sites`
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct SiteQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u32>,
    #[serde(skip_serializing_if = "is_false")]
    pub include_parking: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub include_districts: bool,
}

/// Query of `GET /api/parking-lots`
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct ParkingQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parking_type: Option<ParkingType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Query of `GET /api/cultural-sites/near`
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SitesNearQuery {
    pub lat: f64,
    pub lng: f64,
    /// metres
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Query of `GET /api/parking-lots/near`
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ParkingNearQuery {
    pub lat: f64,
    pub lng: f64,
    /// metres
    pub radius: u32,
    /// same radius under the name the parking router reads
    pub max_distance: u32,
    pub limit: u32,
}

impl ParkingNearQuery {
    pub fn new(lat: f64, lng: f64, radius_m: u32, limit: u32) -> Self {
        Self {
            lat,
            lng,
            radius: radius_m,
            max_distance: radius_m,
            limit,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Query of `GET /api/search/advanced`, minus the search text itself
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_website: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_phone: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_opening_hours: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u32>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AdvancedSearchQuery {
    pub q: String,
    #[serde(flatten)]
    pub filters: SearchFilters,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AutocompleteResponse {
    pub suggestions: Vec<SearchSuggestion>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub total: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AdvancedSearchResponse {
    pub sites: Vec<CulturalSite>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub total_matches: u64,
    #[serde(default)]
    pub filters: Value,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub sorting: Sorting,
}

/// Every REST operation the explorer uses.
///
/// All calls take the caller's cancellation token; a cancelled call resolves to
/// [`ApiError::Cancelled`] without touching any state.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    async fn cultural_sites(
        &self,
        query: &SiteQuery,
        cancel: &CancellationToken,
    ) -> Result<SitesPage, ApiError>;

    async fn cultural_site(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<CulturalSite, ApiError>;

    async fn sites_near(
        &self,
        query: &SitesNearQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<CulturalSite>, ApiError>;

    async fn popular_sites(
        &self,
        category: Option<Category>,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<CulturalSite>, ApiError>;

    async fn parking_lots(
        &self,
        query: &ParkingQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<ParkingLot>, ApiError>;

    async fn parking_near(
        &self,
        query: &ParkingNearQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<ParkingLot>, ApiError>;

    async fn districts(&self, cancel: &CancellationToken) -> Result<Vec<District>, ApiError>;

    async fn district_names(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<DistrictName>, ApiError>;

    async fn categories(&self, cancel: &CancellationToken)
        -> Result<Vec<CategoryInfo>, ApiError>;

    async fn quick_stats(&self, cancel: &CancellationToken) -> Result<QuickStats, ApiError>;

    async fn filter_values(&self, cancel: &CancellationToken) -> Result<FilterValues, ApiError>;

    async fn autocomplete(
        &self,
        q: &str,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<AutocompleteResponse, ApiError>;

    async fn advanced_search(
        &self,
        query: &AdvancedSearchQuery,
        cancel: &CancellationToken,
    ) -> Result<AdvancedSearchResponse, ApiError>;

    async fn login(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<AuthToken, ApiError>;

    async fn register(
        &self,
        registration: &Registration,
        cancel: &CancellationToken,
    ) -> Result<AuthToken, ApiError>;

    async fn current_user(&self, cancel: &CancellationToken) -> Result<User, ApiError>;

    async fn favorites(&self, cancel: &CancellationToken) -> Result<FavoritesList, ApiError>;

    async fn add_favorite(&self, site_id: &str, cancel: &CancellationToken)
        -> Result<(), ApiError>;

    async fn remove_favorite(
        &self,
        site_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError>;

    async fn is_favorite(&self, site_id: &str, cancel: &CancellationToken)
        -> Result<bool, ApiError>;
}
