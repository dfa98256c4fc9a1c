use anyhow::Result;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, PoisonError, RwLock,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use zonein_storage::{Classification, Database, Event, TransportMode};

use crate::{
    parser::parse_url,
    rules::{ClassificationResult, RulesEngine},
    transport::{send_http, SendOutcome, Transport, TransportOptions, TransportState},
};

/// Number of events kept in local history
pub const HISTORY_LIMIT: usize = 100;

/// Number of history entries shown by the UI by default
pub const DEFAULT_HISTORY_QUERY: usize = 10;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A navigation, activation, focus or visibility signal for one tab
#[derive(Debug, Clone)]
pub struct TabSignal {
    pub url: String,
    pub tab_id: i64,
    pub title: Option<String>,
}

/// Answer to the "classify current tab" query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabClassification {
    pub url: String,
    pub host: Option<String>,
    pub path: Option<String>,
    pub classification: Classification,
    pub rule_id: Option<String>,
}

/// An emitted event and its in-flight delivery
///
/// Dropping `delivery` does not cancel the send.
pub struct Emission {
    pub event: Event,
    pub delivery: JoinHandle<SendOutcome>,
}

/// External configuration changes the context should react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingChange {
    /// Rules or default classification were edited, imported or reset
    Rules,
    Monitoring(bool),
    TransportMode(TransportMode),
}

/// Build the engine from stored rules, or from the bundled defaults
///
/// A missing or empty stored rule list is replaced by the bundled defaults,
/// which are then saved so later loads see the same baseline.
///
/// # Errors
///
/// Returns an error if the bundled rules cannot be parsed or saved
pub fn load_engine(database: &Database) -> Result<RulesEngine> {
    match database.get_rules() {
        Ok(Some(rules)) if !rules.is_empty() => {
            let default = database.get_default_classification()?.unwrap_or_default();
            log::info!("Loaded {} stored rules", rules.len());
            return Ok(RulesEngine::new(rules, default));
        }
        Ok(_) => log::info!("No stored rules, using bundled defaults"),
        Err(e) => log::warn!("Stored rules unreadable, using bundled defaults: {e:#}"),
    }

    let engine = RulesEngine::bundled()?;
    save_engine(database, &engine)?;
    Ok(engine)
}

/// Persist an engine's rules and default classification
///
/// # Errors
///
/// Returns an error if the database write fails
pub fn save_engine(database: &Database, engine: &RulesEngine) -> Result<()> {
    database.save_rules(&engine.list_rules(), engine.default_classification())
}

/// Classification plus URL components for a tab
#[must_use]
pub fn classify_tab(engine: &RulesEngine, url: &str) -> TabClassification {
    let result = engine.classify(url);
    let parsed = parse_url(url).ok();
    TabClassification {
        url: url.to_string(),
        host: parsed.as_ref().map(|p| p.host.clone()),
        path: parsed.map(|p| p.path),
        classification: result.classification,
        rule_id: result.rule_id,
    }
}

/// Application state shared by every request handler
pub struct AppContext {
    database: Arc<Database>,
    engine: RwLock<Arc<RulesEngine>>,
    transport: Arc<Mutex<Transport>>,
    monitoring: AtomicBool,
    events: broadcast::Sender<Event>,
}

impl AppContext {
    /// Load rules and settings, then initialize the transport
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if settings cannot be read or the transport cannot be built
    pub fn open(database: Arc<Database>, options: TransportOptions) -> Result<Self> {
        let engine = load_engine(&database)?;
        let monitoring = database.get_monitoring_enabled()?;

        let mut transport = Transport::new(Arc::clone(&database), options)?;
        transport.init()?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        log::info!(
            "ZoneIn context ready (monitoring: {monitoring}, transport: {})",
            transport.mode()
        );

        Ok(Self {
            database,
            engine: RwLock::new(Arc::new(engine)),
            transport: Arc::new(Mutex::new(transport)),
            monitoring: AtomicBool::new(monitoring),
            events,
        })
    }

    /// Snapshot of the current engine
    #[must_use]
    pub fn engine(&self) -> Arc<RulesEngine> {
        Arc::clone(&self.engine.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn replace_engine(&self, engine: RulesEngine) {
        *self.engine.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(engine);
    }

    #[must_use]
    pub fn classify(&self, url: &str) -> ClassificationResult {
        self.engine().classify(url)
    }

    #[must_use]
    pub fn classify_tab(&self, url: &str) -> TabClassification {
        classify_tab(&self.engine(), url)
    }

    /// Classify a tab signal, record it, notify subscribers, then submit delivery
    ///
    /// Returns `None` while monitoring is disabled. History and delivery
    /// failures are logged and never stop the event from being emitted.
    pub async fn observe(&self, signal: TabSignal) -> Option<Emission> {
        if !self.monitoring_enabled() {
            log::debug!("Monitoring disabled, ignoring {}", signal.url);
            return None;
        }

        let TabClassification {
            url,
            host,
            path,
            classification,
            rule_id,
        } = self.classify_tab(&signal.url);

        let event = Event {
            timestamp: chrono::Utc::now().timestamp_millis(),
            url,
            host,
            path,
            classification,
            rule_id,
            tab_id: signal.tab_id,
            title: signal.title,
        };

        self.record_history(event.clone()).await;

        // No subscribers is normal when no UI is open
        let _ = self.events.send(event.clone());

        let delivery = self.submit(event.clone());
        Some(Emission { event, delivery })
    }

    async fn record_history(&self, event: Event) {
        let database = Arc::clone(&self.database);
        let recorded =
            tokio::task::spawn_blocking(move || database.push_history(&event, HISTORY_LIMIT)).await;
        match recorded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Failed to record event history: {e:#}"),
            Err(e) => log::warn!("History task failed: {e}"),
        }
    }

    /// Queue a delivery without waiting for it
    ///
    /// The transport is locked only for native sends; HTTP posts run
    /// concurrently and never block mode changes.
    pub fn submit(&self, event: Event) -> JoinHandle<SendOutcome> {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            let http = transport.lock().await.http_sender();
            let outcome = match http {
                Some(http) => send_http(&http, &event).await,
                None => transport.lock().await.send_event(&event).await,
            };
            if let Some(error) = &outcome.error {
                log::info!("Transport failed (non-critical): {error}");
            }
            outcome
        })
    }

    /// Receive every event emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Most recent events, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the history query fails
    pub fn recent_history(&self, limit: usize) -> Result<Vec<Event>> {
        self.database.recent_history(limit)
    }

    #[must_use]
    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns an error if the flag cannot be persisted
    pub fn set_monitoring_enabled(&self, enabled: bool) -> Result<()> {
        self.database.set_monitoring_enabled(enabled)?;
        self.monitoring.store(enabled, Ordering::SeqCst);
        log::info!("Monitoring {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the mode cannot be persisted
    pub async fn set_transport_mode(&self, mode: TransportMode) -> Result<TransportState> {
        let mut transport = self.transport.lock().await;
        transport.set_mode(mode)?;
        Ok(transport.state())
    }

    pub async fn transport_state(&self) -> TransportState {
        self.transport.lock().await.state()
    }

    /// Persist an edited engine and make it current
    ///
    /// # Errors
    ///
    /// Returns an error if the rules cannot be saved
    pub fn save_rules(&self, engine: RulesEngine) -> Result<()> {
        save_engine(&self.database, &engine)?;
        self.replace_engine(engine);
        Ok(())
    }

    /// Replace the rules with the bundled defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled rules cannot be parsed or saved
    pub fn reset_rules(&self) -> Result<()> {
        self.save_rules(RulesEngine::bundled()?)
    }

    /// Rebuild the engine from storage
    ///
    /// # Errors
    ///
    /// Returns an error if the rules cannot be loaded
    pub fn reload_rules(&self) -> Result<()> {
        self.replace_engine(load_engine(&self.database)?);
        Ok(())
    }

    /// React to a configuration change made elsewhere (for example by another process)
    ///
    /// # Errors
    ///
    /// Returns an error if reloading or reconfiguring fails
    pub async fn apply(&self, change: SettingChange) -> Result<()> {
        match change {
            SettingChange::Rules => self.reload_rules(),
            SettingChange::Monitoring(enabled) => {
                self.monitoring.store(enabled, Ordering::SeqCst);
                Ok(())
            }
            SettingChange::TransportMode(mode) => {
                self.set_transport_mode(mode).await?;
                Ok(())
            }
        }
    }

    /// Close the native channel, if any
    pub async fn shutdown(&self) {
        self.transport.lock().await.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use zonein_storage::Rule;

    fn unreachable_options() -> TransportOptions {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        TransportOptions {
            http_endpoint: format!("http://127.0.0.1:{port}/events"),
            ..TransportOptions::default()
        }
    }

    fn open_context() -> (Arc<Database>, AppContext) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let ctx = AppContext::open(Arc::clone(&db), unreachable_options()).unwrap();
        (db, ctx)
    }

    fn signal(url: &str) -> TabSignal {
        TabSignal {
            url: url.to_string(),
            tab_id: 42,
            title: Some("Title".to_string()),
        }
    }

    #[test]
    fn test_load_engine_seeds_bundled_defaults() {
        let db = Database::open_in_memory().unwrap();
        let engine = load_engine(&db).unwrap();

        let stored = db.get_rules().unwrap().unwrap();
        assert_eq!(stored, engine.list_rules());
        assert_eq!(
            db.get_default_classification().unwrap(),
            Some(engine.default_classification())
        );
    }

    #[test]
    fn test_load_engine_prefers_stored_rules() {
        let db = Database::open_in_memory().unwrap();
        let rules = vec![Rule::domain("example.com", Classification::Productive).with_id("mine")];
        db.save_rules(&rules, Classification::Distracting).unwrap();

        let engine = load_engine(&db).unwrap();
        assert_eq!(engine.list_rules(), rules);
        assert_eq!(engine.default_classification(), Classification::Distracting);
    }

    #[test]
    fn test_load_engine_replaces_empty_rule_list() {
        let db = Database::open_in_memory().unwrap();
        db.save_rules(&[], Classification::Neutral).unwrap();

        let engine = load_engine(&db).unwrap();
        assert!(!engine.list_rules().is_empty());
    }

    #[test]
    fn test_classify_tab_includes_components() {
        let engine = RulesEngine::bundled().unwrap();
        let tab = classify_tab(&engine, "https://github.com/rust-lang?tab=repos");
        assert_eq!(tab.host.as_deref(), Some("github.com"));
        assert_eq!(tab.path.as_deref(), Some("/rust-lang"));
        assert_eq!(tab.classification, Classification::Productive);

        let bad = classify_tab(&engine, "not-a-url");
        assert_eq!(bad.host, None);
        assert_eq!(bad.path, None);
        assert_eq!(bad.rule_id, None);
    }

    #[tokio::test]
    async fn test_observe_records_broadcasts_and_delivers() {
        let (_db, ctx) = open_context();
        let mut events = ctx.subscribe();

        let emission = ctx.observe(signal("https://github.com/")).await.unwrap();
        assert_eq!(emission.event.classification, Classification::Productive);
        assert_eq!(emission.event.tab_id, 42);
        assert_eq!(emission.event.title.as_deref(), Some("Title"));

        // Recorded and broadcast before delivery is awaited
        let history = ctx.recent_history(DEFAULT_HISTORY_QUERY).unwrap();
        assert_eq!(history, vec![emission.event.clone()]);
        assert_eq!(events.recv().await.unwrap(), emission.event);

        // No receiver is listening, so delivery fails without affecting anything else
        let outcome = emission.delivery.await.unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_observe_respects_monitoring_flag() {
        let (db, ctx) = open_context();
        ctx.set_monitoring_enabled(false).unwrap();
        assert!(!db.get_monitoring_enabled().unwrap());
        assert!(ctx.observe(signal("https://github.com/")).await.is_none());
        assert!(ctx.recent_history(10).unwrap().is_empty());

        ctx.apply(SettingChange::Monitoring(true)).await.unwrap();
        assert!(ctx.observe(signal("https://github.com/")).await.is_some());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (_db, ctx) = open_context();
        for n in 0..(HISTORY_LIMIT + 5) {
            let emission = ctx
                .observe(signal(&format!("https://example.com/{n}")))
                .await
                .unwrap();
            emission.delivery.abort();
        }
        let history = ctx.recent_history(HISTORY_LIMIT * 2).unwrap();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(
            history[0].url,
            format!("https://example.com/{}", HISTORY_LIMIT + 4)
        );
    }

    #[tokio::test]
    async fn test_save_and_reload_rules() {
        let (db, ctx) = open_context();

        let mut engine = (*ctx.engine()).clone();
        let id = engine.add_rule(Rule::domain("example.com", Classification::Distracting));
        ctx.save_rules(engine).unwrap();
        assert_eq!(ctx.classify("https://example.com/").rule_id, Some(id));

        // Another writer replaces the stored rules; the context picks them up on apply
        let replacement = vec![Rule::domain("example.com", Classification::Productive).with_id("other")];
        db.save_rules(&replacement, Classification::Neutral).unwrap();
        ctx.apply(SettingChange::Rules).await.unwrap();
        assert_eq!(
            ctx.classify("https://example.com/").rule_id.as_deref(),
            Some("other")
        );

        ctx.reset_rules().unwrap();
        assert_eq!(ctx.classify("https://example.com/").rule_id, None);
    }

    #[tokio::test]
    async fn test_settings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zonein.db");

        {
            let db = Arc::new(Database::new(Some(path.clone())).unwrap());
            let ctx = AppContext::open(db, unreachable_options()).unwrap();
            ctx.set_monitoring_enabled(false).unwrap();
            let mut engine = (*ctx.engine()).clone();
            engine.set_default_classification(Classification::Distracting);
            ctx.save_rules(engine).unwrap();
        }

        let db = Arc::new(Database::new(Some(path)).unwrap());
        let ctx = AppContext::open(db, unreachable_options()).unwrap();
        assert!(!ctx.monitoring_enabled());
        assert_eq!(
            ctx.classify("https://unknown.example/").classification,
            Classification::Distracting
        );
    }

    #[tokio::test]
    async fn test_transport_mode_change() {
        let (db, ctx) = open_context();
        assert_eq!(ctx.transport_state().await, TransportState::Http);

        let state = ctx
            .apply(SettingChange::TransportMode(TransportMode::Http))
            .await;
        assert!(state.is_ok());
        assert_eq!(db.get_transport_mode().unwrap(), Some(TransportMode::Http));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_http_deliveries_do_not_hold_the_transport() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        let db = Arc::new(Database::open_in_memory().unwrap());
        let options = TransportOptions {
            http_endpoint: format!("http://127.0.0.1:{port}/events"),
            http_timeout: Duration::from_secs(3),
            ..TransportOptions::default()
        };
        let ctx = AppContext::open(db, options).unwrap();

        let mut deliveries = Vec::new();
        for n in 0..3 {
            let emission = ctx
                .observe(signal(&format!("https://example.com/{n}")))
                .await
                .unwrap();
            deliveries.push(emission.delivery);
        }

        // All three requests reach the receiver while none has been answered
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while accepted.load(Ordering::SeqCst) < 3 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "deliveries ran one at a time"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let state = tokio::time::timeout(
            Duration::from_millis(500),
            ctx.set_transport_mode(TransportMode::Http),
        )
        .await
        .expect("mode change waited on in-flight deliveries")
        .unwrap();
        assert_eq!(state, TransportState::Http);
        assert_eq!(ctx.transport_state().await, TransportState::Http);
        assert!(deliveries.iter().all(|delivery| !delivery.is_finished()));

        for delivery in deliveries {
            assert!(!delivery.await.unwrap().success);
        }
    }
}
