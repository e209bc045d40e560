//! Location-driven marker refresh cycle.
//!
//! Every new fix clears the map and starts a batch of image fetches. Each
//! fetch runs on its own task and reports back through a channel; the owner
//! of the refresher feeds those completions to [`MarkerRefresher::on_fetch_completed`]
//! on the same task that owns the map, so marker placement never races.

use std::sync::Arc;

use anyhow::{ensure, Result};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::constants::DEFAULT_FETCH_COUNT;
use crate::geo::{Jitter, LatLng};
use crate::image_fetcher::{FetchError, ImageFetcher, MarkerIcon};
use crate::location::LocationProvider;
use crate::map_surface::{MapSurface, MarkerId, MarkerOrigin};

/// Fixed, ordered list of image URLs sampled for marker icons.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSources {
    urls: Arc<[String]>,
}

impl ImageSources {
    pub fn new<I, S>(urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        ensure!(!urls.is_empty(), "image source list must not be empty");
        Ok(Self { urls: urls.into() })
    }

    /// Uniform pick, with replacement.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.urls[rng.gen_range(0..self.urls.len())]
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.urls
    }
}

/// What happens to fetches that finish after a newer refresh cleared the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Late completions still place their marker.
    #[default]
    Keep,
    /// Late completions are discarded.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshConfig {
    pub fetch_count: usize,
    pub jitter: Jitter,
    pub stale_policy: StalePolicy,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            fetch_count: DEFAULT_FETCH_COUNT,
            jitter: Jitter::default(),
            stale_policy: StalePolicy::Keep,
        }
    }
}

/// Result of one image fetch, routed back to the refresher's owner.
#[derive(Debug)]
pub struct FetchCompletion {
    pub generation: u64,
    pub url: String,
    pub trigger: LatLng,
    pub result: Result<MarkerIcon, FetchError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No location was supplied.
    NoLocation,
    /// The map is not ready yet.
    NoMap,
    Started { generation: u64, requested: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    Placed(MarkerId),
    FetchFailed,
    Stale,
    NoMap,
}

pub struct MarkerRefresher<M, P, F, R> {
    map: Option<M>,
    provider: P,
    fetcher: Arc<F>,
    sources: ImageSources,
    config: RefreshConfig,
    rng: R,
    generation: u64,
    completion_tx: mpsc::UnboundedSender<FetchCompletion>,
}

impl<M, P, F, R> MarkerRefresher<M, P, F, R>
where
    M: MapSurface,
    P: LocationProvider,
    F: ImageFetcher,
    R: Rng,
{
    /// Builds a refresher and the channel its fetch completions arrive on.
    pub fn new(
        provider: P,
        fetcher: Arc<F>,
        sources: ImageSources,
        config: RefreshConfig,
        rng: R,
    ) -> (Self, mpsc::UnboundedReceiver<FetchCompletion>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let refresher = Self {
            map: None,
            provider,
            fetcher,
            sources,
            config,
            rng,
            generation: 0,
            completion_tx,
        };
        (refresher, completion_rx)
    }

    pub fn attach_map(&mut self, map: M) {
        self.map = Some(map);
    }

    pub fn detach_map(&mut self) -> Option<M> {
        self.map.take()
    }

    pub fn has_map(&self) -> bool {
        self.map.is_some()
    }

    pub fn map_mut(&mut self) -> Option<&mut M> {
        self.map.as_mut()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Clears the map and starts a new batch of fetches around `location`.
    ///
    /// Must be called from within a tokio runtime; each fetch is spawned.
    pub fn on_location_changed(&mut self, location: Option<LatLng>) -> RefreshOutcome {
        let Some(location) = location else {
            return RefreshOutcome::NoLocation;
        };
        let Some(map) = self.map.as_mut() else {
            debug!(%location, "map not ready, skipping refresh");
            return RefreshOutcome::NoMap;
        };

        map.clear_markers();
        self.generation += 1;
        let generation = self.generation;
        info!(%location, generation, count = self.config.fetch_count, "🔄 Refreshing markers");

        for _ in 0..self.config.fetch_count {
            let url = self.sources.pick(&mut self.rng).to_string();
            let fetcher = Arc::clone(&self.fetcher);
            let tx = self.completion_tx.clone();

            tokio::spawn(async move {
                let result = fetcher.fetch(&url).await;
                // The owner may be gone by now; nothing left to place markers on.
                let _ = tx.send(FetchCompletion {
                    generation,
                    url,
                    trigger: location,
                    result,
                });
            });
        }

        RefreshOutcome::Started {
            generation,
            requested: self.config.fetch_count,
        }
    }

    /// Places a marker for a finished fetch, jittered around the latest known fix.
    pub fn on_fetch_completed(&mut self, completion: FetchCompletion) -> PlacementOutcome {
        let FetchCompletion {
            generation,
            url,
            trigger,
            result,
        } = completion;

        let icon = match result {
            Ok(icon) => icon,
            Err(e) => {
                debug!(%url, error = %e, "image fetch failed, no marker");
                return PlacementOutcome::FetchFailed;
            }
        };

        if generation < self.generation && self.config.stale_policy == StalePolicy::Drop {
            debug!(%url, generation, current = self.generation, "dropping stale fetch");
            return PlacementOutcome::Stale;
        }

        let Some(map) = self.map.as_mut() else {
            return PlacementOutcome::NoMap;
        };

        let anchor = self.provider.last_known_location().unwrap_or(trigger);
        let position = self.config.jitter.apply(anchor, &mut self.rng);
        let id = map.add_marker(
            position,
            icon,
            MarkerOrigin {
                generation,
                source_url: url,
            },
        );
        PlacementOutcome::Placed(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::PushLocationEngine;
    use image::DynamicImage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::future::Future;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Clear,
        Add(LatLng, u64),
    }

    #[derive(Clone, Default)]
    struct RecordingMap {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl RecordingMap {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn adds(&self) -> Vec<LatLng> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Add(pos, _) => Some(pos),
                    Call::Clear => None,
                })
                .collect()
        }
    }

    impl MapSurface for RecordingMap {
        fn clear_markers(&mut self) {
            self.calls.lock().unwrap().push(Call::Clear);
        }

        fn add_marker(&mut self, position: LatLng, _icon: MarkerIcon, origin: MarkerOrigin) -> MarkerId {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call::Add(position, origin.generation));
            MarkerId(calls.len() as u64)
        }
    }

    struct StubFetcher {
        succeed: bool,
    }

    impl ImageFetcher for StubFetcher {
        fn fetch(&self, url: &str) -> impl Future<Output = Result<MarkerIcon, FetchError>> + Send {
            let succeed = self.succeed;
            let url = url.to_string();
            async move {
                if succeed {
                    MarkerIcon::from_image(DynamicImage::new_rgba8(2, 2), 110)
                } else {
                    Err(FetchError::Status { url, status: 404 })
                }
            }
        }
    }

    type TestRefresher = MarkerRefresher<RecordingMap, PushLocationEngine, StubFetcher, StdRng>;

    fn refresher(
        succeed: bool,
        config: RefreshConfig,
    ) -> (TestRefresher, mpsc::UnboundedReceiver<FetchCompletion>, RecordingMap, PushLocationEngine) {
        let engine = PushLocationEngine::new();
        let sources = ImageSources::new(["https://a.test/1.png", "https://a.test/2.png"]).unwrap();
        let (mut refresher, rx) = MarkerRefresher::new(
            engine.clone(),
            Arc::new(StubFetcher { succeed }),
            sources,
            config,
            StdRng::seed_from_u64(2024),
        );
        let map = RecordingMap::default();
        refresher.attach_map(map.clone());
        (refresher, rx, map, engine)
    }

    async fn drain(
        refresher: &mut TestRefresher,
        rx: &mut mpsc::UnboundedReceiver<FetchCompletion>,
        count: usize,
    ) -> Vec<PlacementOutcome> {
        let mut outcomes = Vec::with_capacity(count);
        for _ in 0..count {
            let completion = rx.recv().await.expect("fetch task dropped its sender");
            outcomes.push(refresher.on_fetch_completed(completion));
        }
        outcomes
    }

    fn fix(lat: f64, lng: f64) -> LatLng {
        LatLng::new(lat, lng).unwrap()
    }

    #[tokio::test]
    async fn missing_location_leaves_map_untouched() {
        let (mut refresher, mut rx, map, _) = refresher(true, RefreshConfig::default());

        assert_eq!(refresher.on_location_changed(None), RefreshOutcome::NoLocation);

        assert!(map.calls().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(refresher.generation(), 0);
    }

    #[tokio::test]
    async fn missing_map_skips_refresh() {
        let (mut refresher, mut rx, map, _) = refresher(true, RefreshConfig::default());
        refresher.detach_map();

        assert_eq!(
            refresher.on_location_changed(Some(fix(1.0, 1.0))),
            RefreshOutcome::NoMap
        );
        assert!(map.calls().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ten_successful_fetches_place_ten_jittered_markers() {
        let (mut refresher, mut rx, map, engine) = refresher(true, RefreshConfig::default());
        let origin = fix(37.0, -122.0);
        engine.report(origin);

        let outcome = refresher.on_location_changed(Some(origin));
        assert_eq!(
            outcome,
            RefreshOutcome::Started {
                generation: 1,
                requested: 10
            }
        );

        let outcomes = drain(&mut refresher, &mut rx, 10).await;
        assert!(outcomes.iter().all(|o| matches!(o, PlacementOutcome::Placed(_))));

        let calls = map.calls();
        assert_eq!(calls[0], Call::Clear, "clear must precede every add");
        assert_eq!(calls.iter().filter(|c| **c == Call::Clear).count(), 1);

        let adds = map.adds();
        assert_eq!(adds.len(), 10);
        for pos in adds {
            assert!((pos.lat - 37.0).abs() <= 0.000715, "lat {} too far", pos.lat);
            assert!((pos.lng + 122.0).abs() <= 0.000715, "lng {} too far", pos.lng);
        }
    }

    #[tokio::test]
    async fn failed_fetches_place_nothing() {
        let (mut refresher, mut rx, map, _) = refresher(false, RefreshConfig::default());

        refresher.on_location_changed(Some(fix(37.0, -122.0)));
        let outcomes = drain(&mut refresher, &mut rx, 10).await;

        assert!(outcomes.iter().all(|o| *o == PlacementOutcome::FetchFailed));
        assert_eq!(map.calls(), vec![Call::Clear]);
    }

    #[tokio::test]
    async fn falls_back_to_trigger_when_provider_has_no_fix() {
        let config = RefreshConfig {
            fetch_count: 1,
            jitter: Jitter::new(0.0).unwrap(),
            ..RefreshConfig::default()
        };
        let (mut refresher, mut rx, map, _) = refresher(true, config);

        refresher.on_location_changed(Some(fix(5.0, 6.0)));
        drain(&mut refresher, &mut rx, 1).await;

        assert_eq!(map.adds(), vec![fix(5.0, 6.0)]);
    }

    #[tokio::test]
    async fn markers_follow_the_latest_known_fix() {
        let config = RefreshConfig {
            fetch_count: 1,
            jitter: Jitter::new(0.0).unwrap(),
            ..RefreshConfig::default()
        };
        let (mut refresher, mut rx, map, engine) = refresher(true, config);

        refresher.on_location_changed(Some(fix(5.0, 6.0)));
        engine.report(fix(7.0, 8.0));
        drain(&mut refresher, &mut rx, 1).await;

        assert_eq!(map.adds(), vec![fix(7.0, 8.0)]);
    }

    #[tokio::test]
    async fn stale_completions_are_kept_by_default() {
        let config = RefreshConfig {
            fetch_count: 1,
            ..RefreshConfig::default()
        };
        let (mut refresher, mut rx, map, _) = refresher(true, config);

        refresher.on_location_changed(Some(fix(1.0, 1.0)));
        let first = rx.recv().await.unwrap();
        refresher.on_location_changed(Some(fix(2.0, 2.0)));
        let second = rx.recv().await.unwrap();

        assert!(matches!(refresher.on_fetch_completed(first), PlacementOutcome::Placed(_)));
        assert!(matches!(refresher.on_fetch_completed(second), PlacementOutcome::Placed(_)));

        let generations: Vec<u64> = map
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Add(_, generation) => Some(generation),
                Call::Clear => None,
            })
            .collect();
        assert_eq!(generations, vec![1, 2]);
    }

    #[tokio::test]
    async fn stale_completions_are_dropped_when_configured() {
        let config = RefreshConfig {
            fetch_count: 1,
            stale_policy: StalePolicy::Drop,
            ..RefreshConfig::default()
        };
        let (mut refresher, mut rx, map, _) = refresher(true, config);

        refresher.on_location_changed(Some(fix(1.0, 1.0)));
        let first = rx.recv().await.unwrap();
        refresher.on_location_changed(Some(fix(2.0, 2.0)));
        let second = rx.recv().await.unwrap();

        assert_eq!(refresher.on_fetch_completed(first), PlacementOutcome::Stale);
        assert!(matches!(refresher.on_fetch_completed(second), PlacementOutcome::Placed(_)));
        assert_eq!(map.adds().len(), 1);
    }

    #[test]
    fn empty_source_list_is_rejected() {
        assert!(ImageSources::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn picks_cover_every_source() {
        let sources = ImageSources::new(["a", "b", "c"]).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(sources.pick(&mut rng).to_string());
        }
        assert_eq!(seen.len(), 3);
    }
}
