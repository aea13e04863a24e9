//! Live change notifications for connected browsers.
//!
//! Every catalog write made through the HTTP API is published on a tokio
//! broadcast channel. `GET /api/events` turns a subscription into a
//! Server-Sent Events stream that opens with a `welcome` event.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use site_catalog_core::models::Site;

/// Buffered events per subscriber before a slow client starts lagging.
const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CatalogEvent {
    Welcome {
        message: String,
    },
    /// Many sites changed at once; clients should refetch.
    SitesUpdated {
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<u64>,
    },
    SiteUpdated {
        site: Site,
    },
    PrefixesUpdated {},
}

impl CatalogEvent {
    pub fn welcome() -> Self {
        CatalogEvent::Welcome {
            message: "Connected to server".to_string(),
        }
    }

    pub fn sites_updated(action: &str, count: u64) -> Self {
        CatalogEvent::SitesUpdated {
            action: Some(action.to_string()),
            count: Some(count),
        }
    }

    /// SSE `event:` name.
    pub fn name(&self) -> &'static str {
        match self {
            CatalogEvent::Welcome { .. } => "welcome",
            CatalogEvent::SitesUpdated { .. } => "sitesUpdated",
            CatalogEvent::SiteUpdated { .. } => "siteUpdated",
            CatalogEvent::PrefixesUpdated {} => "prefixesUpdated",
        }
    }

    fn to_sse(&self) -> Option<Event> {
        match Event::default().event(self.name()).json_data(self) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(event = self.name(), error = %e, "failed to encode event");
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<CatalogEvent>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish to all subscribers. Dropped silently when nobody listens.
    pub fn publish(&self, event: CatalogEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(clients) => debug!(event = name, clients, "event published"),
            Err(_) => debug!(event = name, "event dropped, no subscribers"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Event stream for one client: `welcome` first, then every published
    /// event. Lagged receivers skip what they missed.
    pub fn subscribe(&self) -> impl Stream<Item = CatalogEvent> + Send + 'static {
        let live = BroadcastStream::new(self.tx.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = ?e, "event subscriber lagged");
                None
            }
        });
        tokio_stream::once(CatalogEvent::welcome()).chain(live)
    }

    pub fn sse(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        debug!(clients = self.subscriber_count() + 1, "event client connected");
        let stream = self
            .subscribe()
            .filter_map(|event| event.to_sse())
            .map(Ok::<_, Infallible>);

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
