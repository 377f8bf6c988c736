use std::{sync::Arc, time::Instant};

use reqwest::{header::AUTHORIZATION, Method, RequestBuilder, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    api::{
        AdvancedSearchQuery, AdvancedSearchResponse, AutocompleteResponse, Backend,
        ParkingNearQuery, ParkingQuery, SiteQuery, SitesNearQuery,
    },
    config::Config,
    errors::{ApiError, ConfigError},
    models::{
        AuthToken, Category, CategoryInfo, Credentials, CulturalSite, District, DistrictName,
        FavoritesList, FilterValues, ParkingLot, QuickStats, Registration, SitesPage, User,
    },
    session::Session,
};

const MAX_DETAIL_CHARS: usize = 300;

/// Thin wrapper around reqwest that knows the backend's conventions: the `/api` prefix,
/// bearer authentication from the live [`Session`], `{"detail": ...}` error bodies and
/// session teardown on 401.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    session: Arc<Session>,
}

impl ApiClient {
    pub fn new(config: &Config, session: Arc<Session>) -> Result<Self, ConfigError> {
        let base_url = Url::parse(config.api_url.trim()).map_err(|e| ConfigError::Invalid {
            name: "api url",
            message: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                name: "api url",
                message: format!("{base_url} cannot be used as a base url"),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// `segments` are percent-encoded and appended after the base url's path
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        query: &Q,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        let request = self.client.get(self.url(segments)).query(query);
        self.send(request, cancel).await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        let request = self.client.request(method, self.url(segments)).json(body);
        self.send(request, cancel).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        // read at send time, a login or logout may have happened since the caller was built
        let sent_token = self.session.token();
        let request = match &sent_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        };
        let request = request.build()?;

        let method = request.method().clone();
        let path = request.url().path().to_string();
        let started = Instant::now();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%method, %path, "request cancelled");
                return Err(ApiError::Cancelled);
            }
            response = self.client.execute(request) => response?,
        };

        let status = response.status();
        debug!(
            %method,
            %path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "api request"
        );

        if status == StatusCode::UNAUTHORIZED {
            let detail = error_detail(status, response).await;
            // a login that happened while this request was in flight stays untouched
            if let Some(token) = &sent_token {
                if self.session.expire_if(token) {
                    warn!(%path, "token rejected, ending session");
                }
            }
            return Err(ApiError::Unauthorized { detail });
        }

        if !status.is_success() {
            let detail = error_detail(status, response).await;
            return Err(ApiError::Http {
                status: status.as_u16(),
                detail,
            });
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            body = response.bytes() => body?,
        };

        Ok(serde_json::from_slice(&body)?)
    }
}

/// pulls the message out of an error response, the backend puts it in `detail`
async fn error_detail(status: StatusCode, response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();

    let detail = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(obj)) => match obj.get("detail") {
            Some(Value::String(detail)) => Some(detail.clone()),
            // request validation errors come as a list of {loc, msg, type}
            Some(Value::Array(errors)) => Some(
                errors
                    .iter()
                    .filter_map(|e| e.get("msg").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            _ => None,
        },
        _ => None,
    };

    match detail.filter(|d| !d.is_empty()) {
        Some(detail) => detail,
        None if !text.trim().is_empty() => {
            let compact = text.replace(['\n', '\r'], " ");
            compact.chars().take(MAX_DETAIL_CHARS).collect()
        }
        None => format!(
            "request failed with status {}",
            status.canonical_reason().unwrap_or(status.as_str())
        ),
    }
}

#[derive(Deserialize)]
struct SitesEnvelope {
    sites: Vec<CulturalSite>,
}

#[derive(Deserialize)]
struct ParkingEnvelope {
    parking_lots: Vec<ParkingLot>,
}

#[derive(Deserialize)]
struct DistrictsEnvelope {
    districts: Vec<District>,
}

#[derive(Deserialize)]
struct DistrictNamesEnvelope {
    districts: Vec<DistrictName>,
}

#[derive(Deserialize)]
struct FavoriteStatus {
    is_favorite: bool,
}

#[derive(Serialize)]
struct PopularQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<Category>,
    limit: u32,
}

#[derive(Serialize)]
struct AutocompleteQuery<'a> {
    q: &'a str,
    limit: u32,
}

const NO_QUERY: [(&str, &str); 0] = [];

#[async_trait::async_trait]
impl Backend for ApiClient {
    async fn cultural_sites(
        &self,
        query: &SiteQuery,
        cancel: &CancellationToken,
    ) -> Result<SitesPage, ApiError> {
        self.get(&["api", "cultural-sites"], query, cancel).await
    }

    async fn cultural_site(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<CulturalSite, ApiError> {
        self.get(&["api", "cultural-sites", id], &NO_QUERY, cancel)
            .await
    }

    async fn sites_near(
        &self,
        query: &SitesNearQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<CulturalSite>, ApiError> {
        let envelope: SitesEnvelope = self
            .get(&["api", "cultural-sites", "near"], query, cancel)
            .await?;
        Ok(envelope.sites)
    }

    async fn popular_sites(
        &self,
        category: Option<Category>,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<CulturalSite>, ApiError> {
        let query = PopularQuery { category, limit };
        let envelope: SitesEnvelope = self
            .get(&["api", "search", "popular"], &query, cancel)
            .await?;
        Ok(envelope.sites)
    }

    async fn parking_lots(
        &self,
        query: &ParkingQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<ParkingLot>, ApiError> {
        let envelope: ParkingEnvelope = self.get(&["api", "parking-lots"], query, cancel).await?;
        Ok(envelope.parking_lots)
    }

    async fn parking_near(
        &self,
        query: &ParkingNearQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<ParkingLot>, ApiError> {
        let envelope: ParkingEnvelope = self
            .get(&["api", "parking-lots", "near"], query, cancel)
            .await?;
        Ok(envelope.parking_lots)
    }

    async fn districts(&self, cancel: &CancellationToken) -> Result<Vec<District>, ApiError> {
        let envelope: DistrictsEnvelope = self.get(&["api", "districts"], &NO_QUERY, cancel).await?;
        Ok(envelope.districts)
    }

    async fn district_names(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<DistrictName>, ApiError> {
        let envelope: DistrictNamesEnvelope = self
            .get(&["api", "districts", "names"], &NO_QUERY, cancel)
            .await?;
        Ok(envelope.districts)
    }

    async fn categories(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<CategoryInfo>, ApiError> {
        self.get(&["api", "categories"], &NO_QUERY, cancel).await
    }

    async fn quick_stats(&self, cancel: &CancellationToken) -> Result<QuickStats, ApiError> {
        self.get(&["api", "stats", "quick"], &NO_QUERY, cancel).await
    }

    async fn filter_values(&self, cancel: &CancellationToken) -> Result<FilterValues, ApiError> {
        self.get(&["api", "search", "filters", "values"], &NO_QUERY, cancel)
            .await
    }

    async fn autocomplete(
        &self,
        q: &str,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<AutocompleteResponse, ApiError> {
        let query = AutocompleteQuery { q, limit };
        self.get(&["api", "search", "autocomplete"], &query, cancel)
            .await
    }

    async fn advanced_search(
        &self,
        query: &AdvancedSearchQuery,
        cancel: &CancellationToken,
    ) -> Result<AdvancedSearchResponse, ApiError> {
        self.get(&["api", "search", "advanced"], query, cancel).await
    }

    async fn login(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<AuthToken, ApiError> {
        self.send_json(Method::POST, &["api", "auth", "login"], credentials, cancel)
            .await
    }

    async fn register(
        &self,
        registration: &Registration,
        cancel: &CancellationToken,
    ) -> Result<AuthToken, ApiError> {
        self.send_json(
            Method::POST,
            &["api", "auth", "register"],
            registration,
            cancel,
        )
        .await
    }

    async fn current_user(&self, cancel: &CancellationToken) -> Result<User, ApiError> {
        self.get(&["api", "auth", "me"], &NO_QUERY, cancel).await
    }

    async fn favorites(&self, cancel: &CancellationToken) -> Result<FavoritesList, ApiError> {
        self.get(&["api", "favorites"], &NO_QUERY, cancel).await
    }

    async fn add_favorite(
        &self,
        site_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let request = self.client.post(self.url(&["api", "favorites", site_id]));
        let _: Value = self.send(request, cancel).await?;
        Ok(())
    }

    async fn remove_favorite(
        &self,
        site_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let request = self.client.delete(self.url(&["api", "favorites", site_id]));
        let _: Value = self.send(request, cancel).await?;
        Ok(())
    }

    async fn is_favorite(
        &self,
        site_id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ApiError> {
        let status: FavoriteStatus = self
            .get(&["api", "favorites", "check", site_id], &NO_QUERY, cancel)
            .await?;
        Ok(status.is_favorite)
    }
}
