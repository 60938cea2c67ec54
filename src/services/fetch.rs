// src/services/fetch.rs

//! Fetch-and-parse orchestration.
//!
//! Turns many page requests into keyed aggregates without overwhelming the
//! vendor host: each batch keeps at most `max_in_flight` fetches running.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::error::{AppError, Result};
use crate::extract::{HeatPageExtractor, HistoryPageExtractor, PageExtractor};
use crate::models::{FetchConfig, HeatId, HeatRecord, RacerHistory, RacerId, Venue, VenueRegistry};
use crate::utils::Transport;
use crate::utils::url::encode_racer_id;

/// Marker the vendor prints on its generic error page.
pub const SERVER_ERROR_MARKER: &str = "Server Error";

/// Which venues a history fetch should cover.
#[derive(Debug, Clone, Copy)]
pub enum VenueSelection<'a> {
    /// Every venue in the registry
    All,
    /// A single venue given by display string (e.g., "Atlanta")
    Named(&'a str),
}

/// Bounded-concurrency fetcher used by the assembler and the watchers.
///
/// Holds no mutable state, so sharing one across watchers couples nothing
/// but the transport's connection pool.
pub struct FetchOrchestrator {
    transport: Arc<dyn Transport>,
    config: FetchConfig,
    registry: Arc<VenueRegistry>,
}

impl FetchOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, config: FetchConfig, registry: Arc<VenueRegistry>) -> Self {
        Self {
            transport,
            config,
            registry,
        }
    }

    pub fn registry(&self) -> &VenueRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn history_url(&self, venue: &Venue, racer_id: RacerId) -> String {
        format!(
            "{}/sp_center/RacerHistory.aspx?CustID={}",
            self.config.base_url(&venue.subdomain),
            encode_racer_id(racer_id)
        )
    }

    pub fn heat_url(&self, venue: &Venue, heat_id: HeatId) -> String {
        format!(
            "{}/sp_center/HeatDetails.aspx?HeatNo={}",
            self.config.base_url(&venue.subdomain),
            heat_id
        )
    }

    pub fn live_feed_url(&self, venue: &Venue) -> String {
        format!("{}/SP_Center/signalr", self.config.base_url(&venue.subdomain))
    }

    /// Fetch one page and run it through `extractor`, classifying every failure.
    pub async fn try_fetch_and_parse<E: PageExtractor>(&self, url: &str, extractor: &E) -> Result<E::Record> {
        let response = self.transport.get(url).await?;

        if !response.is_success() {
            return Err(AppError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        extractor.extract(&response.body).map_err(|source| {
            if response.body.contains(SERVER_ERROR_MARKER) {
                AppError::VendorServerError {
                    url: url.to_string(),
                }
            } else {
                AppError::parse(url, source)
            }
        })
    }

    /// Fetch one page; failures are logged and come back as `None`.
    pub async fn fetch_and_parse<E: PageExtractor>(&self, url: &str, extractor: &E) -> Option<E::Record> {
        match self.try_fetch_and_parse(url, extractor).await {
            Ok(record) => Some(record),
            Err(AppError::Status { url, status }) => {
                log::error!("Fetching URL returned bad status code: {}", status);
                log::debug!("Source URL: {}", url);
                None
            }
            Err(error @ AppError::Http(_)) => {
                log::error!("Request to {} failed: {}", url, error);
                None
            }
            Err(error) if error.is_transient() => {
                log::error!("{}", error);
                None
            }
            Err(error) => {
                log::error!("Failed to parse response for URL {}: {}", url, error);
                None
            }
        }
    }

    /// Fetch a racer's history from the selected venues, keeping entries after `since`.
    ///
    /// Venues whose page could not be fetched are simply absent from the result.
    pub async fn get_racer_history(
        &self,
        racer_id: RacerId,
        since: DateTime<Utc>,
        selection: VenueSelection<'_>,
    ) -> Result<RacerHistory> {
        let venues: Vec<&Venue> = match selection {
            VenueSelection::All => self.registry.iter().collect(),
            VenueSelection::Named(display) => vec![self.registry.resolve(display)?],
        };

        let concurrency = self.config.max_in_flight.max(1);
        let pages: Vec<_> = stream::iter(venues)
            .map(|venue| async move {
                let extractor = HistoryPageExtractor::new(venue);
                let url = self.history_url(venue, racer_id);
                (venue, self.fetch_and_parse(&url, &extractor).await)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut history = RacerHistory::default();
        for (venue, page) in pages {
            let Some(page) = page else { continue };

            if history.name.is_none() && !page.display_name.is_empty() {
                history.name = Some(page.display_name.clone());
            }
            let entries = page.entries.into_iter().filter(|e| e.time > since).collect();
            history.entries.insert(venue.key(), entries);
        }

        log::debug!(
            "History for racer {}: {} entries across {} venues",
            racer_id,
            history.entry_count(),
            history.entries.len()
        );
        Ok(history)
    }

    /// Fetch heat details for every id in `heat_ids` at `venue`.
    ///
    /// Heats whose page could not be fetched or parsed are omitted.
    pub async fn get_heat_info(&self, venue: &Venue, heat_ids: &[HeatId]) -> HashMap<HeatId, HeatRecord> {
        let extractor = HeatPageExtractor::new(venue);
        let extractor = &extractor;
        let concurrency = self.config.max_in_flight.max(1);

        let fetched: Vec<_> = stream::iter(heat_ids.iter().copied())
            .map(|heat_id| async move {
                let url = self.heat_url(venue, heat_id);
                (heat_id, self.fetch_and_parse(&url, extractor).await)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let total = fetched.len();
        let heats: HashMap<HeatId, HeatRecord> = fetched
            .into_iter()
            .filter_map(|(heat_id, heat)| heat.map(|heat| (heat_id, heat)))
            .collect();

        if heats.len() < total {
            log::warn!(
                "{}: fetched {} of {} heats",
                venue.name,
                heats.len(),
                total
            );
        }
        heats
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::collections::HashMap as Map;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::utils::HttpResponse;
    use crate::utils::url::encode_racer_id;

    /// Serves canned responses by URL and counts concurrent requests.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pages: Mutex<Map<String, HttpResponse>>,
        pub(crate) posts: Mutex<Vec<HttpResponse>>,
        pub(crate) post_log: Mutex<Vec<Vec<(String, String)>>>,
        in_flight: AtomicUsize,
        pub(crate) peak: AtomicUsize,
        pub(crate) gets: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeTransport {
        pub(crate) fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub(crate) fn page(&self, url: impl Into<String>, status: u16, body: impl Into<String>) {
            self.pages
                .lock()
                .unwrap()
                .insert(url.into(), HttpResponse::new(status, body));
        }

        pub(crate) fn queue_post(&self, status: u16, body: impl Into<String>) {
            self.posts.lock().unwrap().push(HttpResponse::new(status, body));
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn get(&self, url: &str) -> Result<HttpResponse> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let pages = self.pages.lock().unwrap();
            Ok(pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| HttpResponse::new(404, "not found")))
        }

        async fn post_form(&self, _url: &str, form: &[(&str, String)]) -> Result<HttpResponse> {
            self.post_log
                .lock()
                .unwrap()
                .push(form.iter().map(|(k, v)| (k.to_string(), v.clone())).collect());
            let mut posts = self.posts.lock().unwrap();
            if posts.is_empty() {
                Ok(HttpResponse::new(503, ""))
            } else {
                Ok(posts.remove(0))
            }
        }
    }

    pub(crate) fn atlanta() -> Venue {
        Venue::new("Atlanta", "k1atlanta", 1, chrono_tz::US::Eastern)
    }

    pub(crate) fn orchestrator(transport: Arc<FakeTransport>, venues: Vec<Venue>, max_in_flight: usize) -> FetchOrchestrator {
        let config = FetchConfig {
            max_in_flight,
            ..FetchConfig::default()
        };
        FetchOrchestrator::new(transport, config, Arc::new(VenueRegistry::new(venues).unwrap()))
    }

    /// Minimal heat page with one regular row per `(racer_id, name)`.
    pub(crate) fn heat_page(heat_id: HeatId, racers: &[(u64, &str)]) -> String {
        let rows: String = racers
            .iter()
            .enumerate()
            .map(|(i, (id, name))| {
                format!(
                    r#"<tr class="RegularRow"><td class="Position">{}</td><td><a href="RacerHistory.aspx?CustID={}">{}</a></td><td class="RPM"><span>{}</span></td></tr>"#,
                    i + 1,
                    encode_racer_id(*id),
                    name,
                    1300 - i as i32 * 10
                )
            })
            .collect();
        let laps: String = racers
            .iter()
            .map(|(_, name)| {
                format!(
                    r#"<table class="LapTimes"><thead><tr><th>{name}</th></tr></thead><tr class="LapTimesRow"><td>1</td><td>26.100 (1)</td></tr><tr class="LapTimesRowAlt"><td>2</td><td>25.900 (1)</td></tr></table>"#
                )
            })
            .collect();
        format!(
            r#"<html><body><form method="post" action="./HeatDetails.aspx?HeatNo={heat_id}">
            <span id="lblRaceType">.STANDARD Race.</span><span id="lblWinnerBy">Best Lap</span>
            <span id="lblDate">05/01/2022 06:00 PM</span>
            <table>{rows}</table>{laps}</form></body></html>"#
        )
    }

    pub(crate) fn history_page(name: &str, rows: &[(HeatId, u32, &str)]) -> String {
        let rows: String = rows
            .iter()
            .map(|(heat, kart, time)| {
                format!(
                    r#"<tr class="Normal"><td>Kart {kart}</td><td>{time}</td><td><a href="HeatDetails.aspx?HeatNo={heat}">Details</a></td></tr>"#
                )
            })
            .collect();
        format!(r#"<html><body><span id="lblRacerName">{name}</span><table>{rows}</table></body></html>"#)
    }

    #[test]
    fn test_url_templates() {
        let fetch = orchestrator(Arc::new(FakeTransport::default()), vec![atlanta()], 10);
        let venue = atlanta();
        assert_eq!(
            fetch.history_url(&venue, 123),
            "https://k1atlanta.clubspeedtiming.com/sp_center/RacerHistory.aspx?CustID=MTIz"
        );
        assert_eq!(
            fetch.heat_url(&venue, 147204),
            "https://k1atlanta.clubspeedtiming.com/sp_center/HeatDetails.aspx?HeatNo=147204"
        );
        assert_eq!(
            fetch.live_feed_url(&venue),
            "https://k1atlanta.clubspeedtiming.com/SP_Center/signalr"
        );
    }

    #[tokio::test]
    async fn test_fetch_and_parse_classifies_failures() {
        let transport = Arc::new(FakeTransport::default());
        let fetch = orchestrator(Arc::clone(&transport), vec![atlanta()], 10);
        let extractor = HeatPageExtractor::new(&atlanta());

        transport.page("https://x/500", 500, "boom");
        transport.page("https://x/vendor", 200, "<html><body><h1>Server Error in '/' Application.</h1></body></html>");
        transport.page("https://x/drift", 200, "<html><body><span id=\"lblRaceType\">Hovercraft</span></body></html>");
        transport.page("https://x/ok", 200, heat_page(5, &[(1, "A")]));

        assert!(matches!(
            fetch.try_fetch_and_parse("https://x/500", &extractor).await,
            Err(AppError::Status { status: 500, .. })
        ));
        assert!(matches!(
            fetch.try_fetch_and_parse("https://x/vendor", &extractor).await,
            Err(AppError::VendorServerError { .. })
        ));
        assert!(matches!(
            fetch.try_fetch_and_parse("https://x/drift", &extractor).await,
            Err(AppError::Parse { .. })
        ));
        assert!(fetch.fetch_and_parse("https://x/500", &extractor).await.is_none());
        assert_eq!(fetch.fetch_and_parse("https://x/ok", &extractor).await.unwrap().heat_id, 5);
    }

    /// Fails every request before a status is received.
    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn get(&self, url: &str) -> Result<HttpResponse> {
            // A relative URL makes reqwest fail without touching the network.
            let error = reqwest::Client::new()
                .get(url.trim_start_matches("https://"))
                .build()
                .unwrap_err();
            Err(AppError::Http(error))
        }

        async fn post_form(&self, _url: &str, _form: &[(&str, String)]) -> Result<HttpResponse> {
            Ok(HttpResponse::new(503, ""))
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_transient() {
        let registry = Arc::new(VenueRegistry::new(vec![atlanta()]).unwrap());
        let fetch = FetchOrchestrator::new(Arc::new(Unreachable), FetchConfig::default(), registry);
        let extractor = HeatPageExtractor::new(&atlanta());
        let url = fetch.heat_url(&atlanta(), 1);

        let error = fetch.try_fetch_and_parse(&url, &extractor).await.unwrap_err();
        assert!(matches!(error, AppError::Http(_)));
        assert!(error.is_transient());
        assert!(fetch.fetch_and_parse(&url, &extractor).await.is_none());
    }

    #[tokio::test]
    async fn test_get_heat_info_omits_failed_heats() {
        let transport = Arc::new(FakeTransport::default());
        let fetch = orchestrator(Arc::clone(&transport), vec![atlanta()], 3);
        let venue = atlanta();

        let ids: Vec<HeatId> = (1..=8).collect();
        for &id in &ids {
            let url = fetch.heat_url(&venue, id);
            if id % 3 == 0 {
                transport.page(url, 502, "bad gateway");
            } else {
                transport.page(url, 200, heat_page(id, &[(id * 10, "Racer")]));
            }
        }

        let heats = fetch.get_heat_info(&venue, &ids).await;
        assert_eq!(heats.len(), 6);
        assert!(!heats.contains_key(&3));
        assert!(!heats.contains_key(&6));
        assert_eq!(heats[&4].heat_id, 4);
        assert_eq!(heats[&4].sessions[0].racer_id, 40);
    }

    #[tokio::test]
    async fn test_in_flight_bound_is_respected() {
        let transport = Arc::new(FakeTransport::with_delay(Duration::from_millis(5)));
        let fetch = orchestrator(Arc::clone(&transport), vec![atlanta()], 4);
        let venue = atlanta();
        let ids: Vec<HeatId> = (1..=30).collect();

        let heats = fetch.get_heat_info(&venue, &ids).await;

        assert!(heats.is_empty());
        assert_eq!(transport.gets.load(Ordering::SeqCst), 30);
        let peak = transport.peak.load(Ordering::SeqCst);
        assert_eq!(peak, 4, "peak in-flight was {peak}");
    }

    #[tokio::test]
    async fn test_concurrent_batches_do_not_wait_on_each_other() {
        let transport = Arc::new(FakeTransport::with_delay(Duration::from_millis(5)));
        let fetch = orchestrator(Arc::clone(&transport), vec![atlanta()], 2);
        let venue = atlanta();
        let ids: Vec<HeatId> = (1..=8).collect();

        tokio::join!(
            fetch.get_heat_info(&venue, &ids[..4]),
            fetch.get_heat_info(&venue, &ids[4..])
        );

        // Each batch has its own bound of 2.
        assert_eq!(transport.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_history_server_error_page_is_dropped() {
        let transport = Arc::new(FakeTransport::default());
        let fetch = orchestrator(Arc::clone(&transport), vec![atlanta()], 10);
        let url = fetch.history_url(&atlanta(), 42);
        transport.page(
            url.clone(),
            200,
            "<html><body><h2>Server Error in '/' Application.</h2></body></html>",
        );

        let extractor = HistoryPageExtractor::new(&atlanta());
        assert!(matches!(
            fetch.try_fetch_and_parse(&url, &extractor).await,
            Err(AppError::VendorServerError { .. })
        ));

        let since = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let history = fetch.get_racer_history(42, since, VenueSelection::All).await.unwrap();
        assert!(history.is_empty());
        assert!(history.name.is_none());
    }

    #[tokio::test]
    async fn test_get_racer_history_filters_and_merges() {
        let transport = Arc::new(FakeTransport::default());
        let san_diego = Venue::new("San Diego", "k1sandiego", 1, chrono_tz::US::Pacific);
        let fetch = orchestrator(Arc::clone(&transport), vec![atlanta(), san_diego.clone()], 10);

        transport.page(
            fetch.history_url(&atlanta(), 77),
            200,
            history_page("Test Racer", &[(2, 12, "03/01/2022 07:00 PM"), (1, 11, "01/01/2020 07:00 PM")]),
        );
        transport.page(fetch.history_url(&san_diego, 77), 500, "down");

        let since = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let history = fetch.get_racer_history(77, since, VenueSelection::All).await.unwrap();

        assert_eq!(history.name.as_deref(), Some("Test Racer"));
        assert_eq!(history.entries.len(), 1);
        let atlanta_entries = &history.entries["atlanta"];
        assert_eq!(atlanta_entries.len(), 1);
        assert_eq!(atlanta_entries[0].heat_id, 2);
        assert_eq!(atlanta_entries[0].kart, 12);
    }

    #[tokio::test]
    async fn test_get_racer_history_named_venue() {
        let transport = Arc::new(FakeTransport::default());
        let fetch = orchestrator(Arc::clone(&transport), vec![atlanta()], 10);
        transport.page(fetch.history_url(&atlanta(), 5), 200, history_page("Five", &[]));

        let since = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let history = fetch
            .get_racer_history(5, since, VenueSelection::Named("atlanta"))
            .await
            .unwrap();
        assert_eq!(history.name.as_deref(), Some("Five"));

        let err = fetch
            .get_racer_history(5, since, VenueSelection::Named("Nowhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LocationNotRecognized(_)));
        assert_eq!(transport.gets.load(Ordering::SeqCst), 1);
    }
}
