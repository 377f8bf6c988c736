use std::{future::Future, sync::Arc};

use serde::Serialize;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    api::{Backend, ParkingQuery, SiteQuery},
    cache::{cache_key, QueryCache, CACHE_CAPACITY},
    errors::ApiError,
    fetch::{FetchState, Resource},
    models::{CategoryInfo, CulturalSite, District, DistrictName, ParkingLot, QuickStats, SitesPage},
    parking::{find_parking_near_sites, NearbyOptions, NearbyParking},
};

/// A [`Resource`] with a private result cache in front of its fetch.
///
/// The cache lives and dies with the handle, it is never shared.
pub struct CachedResource<Q, T> {
    resource: Resource<Q, T>,
    cache: Arc<Mutex<QueryCache<T>>>,
}

impl<Q, T> CachedResource<Q, T>
where
    Q: Serialize + Clone + PartialEq + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(label: &'static str, fetch: F) -> Self
    where
        F: Fn(Q, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let cache = Arc::new(Mutex::new(QueryCache::new(CACHE_CAPACITY)));
        let fetch = Arc::new(fetch);

        let resource = {
            let cache = cache.clone();
            Resource::labelled(label, move |query: Q, cancel| {
                let cache = cache.clone();
                let fetch = fetch.clone();
                async move {
                    let key = cache_key(&query)?;
                    if let Some(hit) = cache.lock().await.get(&key) {
                        debug!(resource = label, %key, "cache hit");
                        return Ok(hit);
                    }

                    let value = fetch(query, cancel).await?;
                    cache.lock().await.insert(key, value.clone());
                    Ok(value)
                }
            })
        };

        Self { resource, cache }
    }

    pub fn set_query(&self, query: Q) -> Option<JoinHandle<()>> {
        self.resource.set_deps(query)
    }

    pub fn refetch(&self) -> Option<JoinHandle<()>> {
        self.resource.refetch()
    }

    pub fn state(&self) -> FetchState<T> {
        self.resource.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.resource.subscribe()
    }

    pub async fn settled(&self) -> FetchState<T> {
        self.resource.settled().await
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// forgets every cached result, the next query goes to the network
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }
}

pub fn cultural_sites(backend: Arc<dyn Backend>) -> CachedResource<SiteQuery, SitesPage> {
    CachedResource::new("cultural_sites", move |query: SiteQuery, cancel| {
        let backend = backend.clone();
        async move { backend.cultural_sites(&query, &cancel).await }
    })
}

pub fn parking_lots(backend: Arc<dyn Backend>) -> CachedResource<ParkingQuery, Vec<ParkingLot>> {
    CachedResource::new("parking_lots", move |query: ParkingQuery, cancel| {
        let backend = backend.clone();
        async move { backend.parking_lots(&query, &cancel).await }
    })
}

pub fn districts(backend: Arc<dyn Backend>) -> CachedResource<(), Vec<District>> {
    CachedResource::new("districts", move |(), cancel| {
        let backend = backend.clone();
        async move { backend.districts(&cancel).await }
    })
}

pub fn district_names(backend: Arc<dyn Backend>) -> CachedResource<(), Vec<DistrictName>> {
    CachedResource::new("district_names", move |(), cancel| {
        let backend = backend.clone();
        async move { backend.district_names(&cancel).await }
    })
}

pub fn categories(backend: Arc<dyn Backend>) -> CachedResource<(), Vec<CategoryInfo>> {
    CachedResource::new("categories", move |(), cancel| {
        let backend = backend.clone();
        async move { backend.categories(&cancel).await }
    })
}

pub fn quick_stats(backend: Arc<dyn Backend>) -> CachedResource<(), QuickStats> {
    CachedResource::new("quick_stats", move |(), cancel| {
        let backend = backend.clone();
        async move { backend.quick_stats(&cancel).await }
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyRequest {
    pub sites: Vec<CulturalSite>,
    pub options: NearbyOptions,
}

/// parking around the currently shown sites, recomputed when the sites or options change
pub fn nearby_parking(backend: Arc<dyn Backend>) -> Resource<NearbyRequest, NearbyParking> {
    Resource::labelled("nearby_parking", move |request: NearbyRequest, cancel| {
        let backend = backend.clone();
        async move {
            Ok(find_parking_near_sites(
                backend.as_ref(),
                &request.sites,
                &request.options,
                &cancel,
            )
            .await)
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::{
        api::MockBackend,
        models::{Category, ParkingType},
        parking::tests::{lot, site},
    };

    use super::*;

    fn counting_sites_backend(calls: Arc<AtomicUsize>) -> Arc<dyn Backend> {
        let mut backend = MockBackend::new();
        backend.expect_cultural_sites().returning(move |query, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(SitesPage {
                sites: vec![site(&format!("{:?}", query.limit), None)],
                total: 1,
                ..Default::default()
            })
        });
        Arc::new(backend)
    }

    fn query(limit: u32) -> SiteQuery {
        SiteQuery {
            category: Some(Category::Theatre),
            limit: Some(limit),
            ..Default::default()
        }
    }

    async fn load(resource: &CachedResource<SiteQuery, SitesPage>, q: SiteQuery) {
        resource.set_query(q).unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_identical_query_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sites = cultural_sites(counting_sites_backend(calls.clone()));

        load(&sites, query(1)).await;
        load(&sites, query(2)).await;
        load(&sites, query(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let state = sites.state();
        assert_eq!(state.data.unwrap().sites[0].id, "Some(1)");
        assert_eq!(sites.cached_entries().await, 2);
    }

    #[tokio::test]
    async fn test_cache_keeps_ten_newest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sites = cultural_sites(counting_sites_backend(calls.clone()));

        for limit in 0..11 {
            load(&sites, query(limit)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 11);
        assert_eq!(sites.cached_entries().await, 10);

        // still cached
        load(&sites, query(5)).await;
        load(&sites, query(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 11);

        // evicted first
        load(&sites, query(0)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut backend = MockBackend::new();
        backend.expect_parking_lots().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::Timeout)
            } else {
                Ok(vec![lot("p", ParkingType::Bus, (12.9, 50.8))])
            }
        });
        let parking = parking_lots(Arc::new(backend));

        parking
            .set_query(ParkingQuery::default())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(parking.state().error.as_deref(), Some("request timed out"));
        assert_eq!(parking.cached_entries().await, 0);

        parking.refetch().unwrap().await.unwrap();
        let state = parking.state();
        assert_eq!(state.error, None);
        assert_eq!(state.data.unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unit_query_resources_load_once() {
        let mut backend = MockBackend::new();
        backend
            .expect_quick_stats()
            .times(1)
            .returning(|_| Ok(QuickStats {
                total_sites: 312,
                ..Default::default()
            }));
        let stats = quick_stats(Arc::new(backend));

        stats.set_query(()).unwrap().await.unwrap();
        assert!(stats.set_query(()).is_none());
        stats.refetch().unwrap().await.unwrap();

        assert_eq!(stats.settled().await.data.unwrap().total_sites, 312);
    }

    #[tokio::test]
    async fn test_nearby_parking_resource() {
        let mut backend = MockBackend::new();
        backend
            .expect_parking_near()
            .returning(|_, _| Ok(vec![lot("p", ParkingType::Caravan, (12.92, 50.83))]));
        let nearby = nearby_parking(Arc::new(backend));

        let request = NearbyRequest {
            sites: vec![site("a", Some((12.92, 50.83)))],
            options: NearbyOptions::default(),
        };
        nearby.set_deps(request).unwrap().await.unwrap();

        let data = nearby.state().data.unwrap();
        assert_eq!(data.parking_lots.len(), 1);
        assert_eq!(data.connections.len(), 1);
    }
}
