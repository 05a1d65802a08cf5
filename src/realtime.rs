//! Realtime broker: long-lived client registry with filtered fan-out of new
//! events and org-scoped alerts. Delivery is at-least-once per client;
//! ordering is per-client insertion order.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::event::Event;
use crate::models::settings::OrgSettings;
use crate::store::fmt_ts;

pub const PROTOCOL_VERSION: u32 = 1;

/// Outbound frame buffer per client. A slow consumer that falls this far
/// behind gets disconnected rather than applying back-pressure to ingest.
const CLIENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Matched against `priority_score`.
    pub min_threat_level: Option<f64>,
    pub min_relevance: Option<f64>,
}

/// Client -> server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default = "default_protocol")]
        protocol: u32,
        filter: SubscriptionFilter,
    },
    Unsubscribe,
    Ping,
}

fn default_protocol() -> u32 {
    PROTOCOL_VERSION
}

struct ClientHandle {
    org_id: String,
    filter: Option<SubscriptionFilter>,
    sender: mpsc::Sender<String>,
    last_seen: Instant,
}

pub struct Broker {
    clients: RwLock<HashMap<String, ClientHandle>>,
    heartbeat: Duration,
}

impl Broker {
    pub fn new(heartbeat_secs: u64) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            heartbeat: Duration::from_secs(heartbeat_secs),
        }
    }

    /// Registers a connection; frames for the client arrive on the receiver.
    pub fn register(&self, org_id: &str) -> (String, mpsc::Receiver<String>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(CLIENT_BUFFER);
        self.clients.write().unwrap().insert(
            id.clone(),
            ClientHandle {
                org_id: org_id.to_string(),
                filter: None,
                sender,
                last_seen: Instant::now(),
            },
        );
        tracing::debug!("realtime client {id} registered (org {org_id})");
        (id, receiver)
    }

    /// Removal is immediate; frames still in the channel are dropped with it.
    pub fn unregister(&self, client_id: &str) {
        if self.clients.write().unwrap().remove(client_id).is_some() {
            tracing::debug!("realtime client {client_id} unregistered");
        }
    }

    pub fn subscribe(&self, client_id: &str, filter: SubscriptionFilter) {
        if let Some(client) = self.clients.write().unwrap().get_mut(client_id) {
            client.filter = Some(filter);
            client.last_seen = Instant::now();
        }
    }

    pub fn unsubscribe(&self, client_id: &str) {
        if let Some(client) = self.clients.write().unwrap().get_mut(client_id) {
            client.filter = None;
        }
    }

    /// Liveness mark on any inbound frame.
    pub fn touch(&self, client_id: &str) {
        if let Some(client) = self.clients.write().unwrap().get_mut(client_id) {
            client.last_seen = Instant::now();
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    /// Fan-out of a newly persisted, fully enriched event.
    pub fn publish_event(&self, event: &Event) {
        let frame = server_frame("event:new", serde_json::to_value(event).unwrap_or_default());
        let clients = self.clients.read().unwrap();
        for (id, client) in clients.iter() {
            let Some(filter) = &client.filter else {
                continue;
            };
            if filter_matches(filter, event) {
                deliver(id, client, &frame);
            }
        }
    }

    /// Org-scoped alert; only clients authenticated into the org receive it.
    pub fn publish_alert(&self, org_id: &str, event: &Event) {
        let frame = server_frame(
            "alert:triggered",
            serde_json::json!({ "org_id": org_id, "event": event }),
        );
        let clients = self.clients.read().unwrap();
        for (id, client) in clients.iter() {
            if client.org_id == org_id {
                deliver(id, client, &frame);
            }
        }
    }

    /// Emits a heartbeat to every client and drops those that have been
    /// silent for two heartbeat intervals.
    pub fn heartbeat_and_sweep(&self) {
        let frame = server_frame("heartbeat", serde_json::json!({}));
        let mut stale = Vec::new();
        {
            let clients = self.clients.read().unwrap();
            for (id, client) in clients.iter() {
                if client.last_seen.elapsed() > self.heartbeat * 2 {
                    stale.push(id.clone());
                } else {
                    deliver(id, client, &frame);
                }
            }
        }
        for id in stale {
            tracing::info!("realtime client {id} missed two heartbeats, closing");
            self.unregister(&id);
        }
    }
}

fn deliver(id: &str, client: &ClientHandle, frame: &str) {
    if let Err(e) = client.sender.try_send(frame.to_string()) {
        tracing::warn!("realtime client {id} send failed: {e}");
    }
}

fn server_frame(kind: &str, data: serde_json::Value) -> String {
    serde_json::json!({
        "type": kind,
        "timestamp": fmt_ts(Utc::now()),
        "data": data,
    })
    .to_string()
}

/// Subscription filter evaluation. Empty list fields match everything.
pub fn filter_matches(filter: &SubscriptionFilter, event: &Event) -> bool {
    if !filter.categories.is_empty() {
        let Some(category) = event.category else {
            return false;
        };
        if !filter
            .categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category.as_str()))
        {
            return false;
        }
    }
    if !filter.regions.is_empty() {
        let location = event.location_name.as_deref().unwrap_or("");
        let region = event.admin_region.as_deref().unwrap_or("");
        if !filter
            .regions
            .iter()
            .any(|r| r.eq_ignore_ascii_case(location) || r.eq_ignore_ascii_case(region))
        {
            return false;
        }
    }
    if let Some(min) = filter.min_relevance
        && event.relevance_score < min
    {
        return false;
    }
    if let Some(min) = filter.min_threat_level
        && event.priority_score < min
    {
        return false;
    }
    true
}

/// True when an enriched event crosses the org's alert configuration. Orgs
/// without alert categories or sentiments configured receive no alerts.
pub fn alert_matches(settings: &OrgSettings, event: &Event) -> bool {
    if settings.alert_categories.is_empty() && settings.alert_sentiment_types.is_empty() {
        return false;
    }
    let category_hit = event.category.is_some_and(|c| {
        settings
            .alert_categories
            .iter()
            .any(|a| a.eq_ignore_ascii_case(c.as_str()))
    });
    let sentiment_hit = event.sentiment.is_some_and(|s| {
        settings
            .alert_sentiment_types
            .iter()
            .any(|a| a.eq_ignore_ascii_case(s.as_str()))
    });
    (category_hit || sentiment_hit) && event.relevance_score >= settings.high_priority_threshold
}

pub fn spawn_heartbeat(broker: Arc<Broker>, heartbeat_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(heartbeat_secs));
        loop {
            interval.tick().await;
            broker.heartbeat_and_sweep();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{Category, EntityBag, Sentiment};
    use chrono::Utc;

    fn event(category: Category, relevance: f64, priority: f64) -> Event {
        Event {
            event_id: "e1".into(),
            source_id: "s1".into(),
            source_url: "https://e.org/1".into(),
            raw_title: "t".into(),
            raw_text: "x".into(),
            fetched_at: Utc::now(),
            published_at: Utc::now(),
            timestamp: Utc::now(),
            location_name: Some("Brussels".into()),
            admin_region: Some("Belgium".into()),
            location_lat: None,
            location_lon: None,
            summary: Some("s".into()),
            category: Some(category),
            sentiment: Some(Sentiment::Negative),
            entities: EntityBag::default(),
            confidence_score: 0.5,
            relevance_score: relevance,
            priority_score: priority,
            cluster_id: None,
            source_count: 1,
            multi_source_boost: false,
            row_version: 0,
            enriched_at: Some(Utc::now()),
            deleted_at: None,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn filter_category_and_relevance() {
        let filter = SubscriptionFilter {
            categories: vec!["crime".into()],
            min_relevance: Some(0.7),
            ..Default::default()
        };
        assert!(!filter_matches(&filter, &event(Category::Weather, 0.9, 0.5)));
        assert!(!filter_matches(&filter, &event(Category::Crime, 0.5, 0.5)));
        assert!(filter_matches(&filter, &event(Category::Crime, 0.8, 0.5)));
    }

    #[test]
    fn filter_regions_match_name_or_admin_region() {
        let by_city = SubscriptionFilter {
            regions: vec!["brussels".into()],
            ..Default::default()
        };
        let by_country = SubscriptionFilter {
            regions: vec!["Belgium".into()],
            ..Default::default()
        };
        let elsewhere = SubscriptionFilter {
            regions: vec!["Spain".into()],
            ..Default::default()
        };
        let e = event(Category::Crime, 0.8, 0.5);
        assert!(filter_matches(&by_city, &e));
        assert!(filter_matches(&by_country, &e));
        assert!(!filter_matches(&elsewhere, &e));
    }

    #[test]
    fn threat_level_uses_priority() {
        let filter = SubscriptionFilter {
            min_threat_level: Some(0.6),
            ..Default::default()
        };
        assert!(!filter_matches(&filter, &event(Category::Crime, 0.9, 0.5)));
        assert!(filter_matches(&filter, &event(Category::Crime, 0.9, 0.7)));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(filter_matches(
            &SubscriptionFilter::default(),
            &event(Category::Other, 0.0, 0.0)
        ));
    }

    #[test]
    fn unsubscribed_clients_receive_nothing() {
        let broker = Broker::new(30);
        let (id, mut rx) = broker.register("org-a");
        broker.publish_event(&event(Category::Crime, 0.9, 0.9));
        assert!(rx.try_recv().is_err());
        broker.subscribe(&id, SubscriptionFilter::default());
        broker.publish_event(&event(Category::Crime, 0.9, 0.9));
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"event:new\""));
    }

    #[test]
    fn alerts_are_org_scoped() {
        let broker = Broker::new(30);
        let (_a, mut rx_a) = broker.register("org-a");
        let (_b, mut rx_b) = broker.register("org-b");
        broker.publish_alert("org-a", &event(Category::Crime, 0.9, 0.9));
        assert!(rx_a.try_recv().unwrap().contains("alert:triggered"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn alert_threshold_evaluation() {
        let mut settings = OrgSettings::defaults("org-a");
        assert!(!alert_matches(&settings, &event(Category::Crime, 0.9, 0.9)));
        settings.alert_categories = vec!["crime".into()];
        assert!(alert_matches(&settings, &event(Category::Crime, 0.9, 0.9)));
        assert!(!alert_matches(&settings, &event(Category::Weather, 0.9, 0.9)));
        // below the priority threshold
        assert!(!alert_matches(&settings, &event(Category::Crime, 0.5, 0.9)));
    }

    #[test]
    fn unregister_is_immediate() {
        let broker = Broker::new(30);
        let (id, _rx) = broker.register("org-a");
        assert_eq!(broker.client_count(), 1);
        broker.unregister(&id);
        assert_eq!(broker.client_count(), 0);
    }
}
