//! Watches connectivity and asks for a content refresh after reconnects.
//!
//! This is a passive observer: it never retries fetches itself, it only tells
//! the runtime when a refresh is worth doing.

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::config::NetworkConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactorAction {
    RefreshNow,
    RefreshAfter(Duration),
}

/// Turns connectivity samples into refresh decisions.
#[derive(Debug)]
pub struct NetworkReactor {
    last: Option<Connectivity>,
    reconnect_delay: Duration,
}

impl NetworkReactor {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self { last: None, reconnect_delay }
    }

    /// Records a sample. Only an offline → online transition produces an action.
    pub fn observe(&mut self, now: Connectivity, queue_is_empty: bool) -> Option<ReactorAction> {
        let previous = self.last.replace(now);
        match (previous, now) {
            (Some(Connectivity::Offline), Connectivity::Online) => {
                if queue_is_empty {
                    info!("Back online with nothing to play, preparing content now.");
                    Some(ReactorAction::RefreshNow)
                } else {
                    info!("Back online, refreshing content in {:?}.", self.reconnect_delay);
                    Some(ReactorAction::RefreshAfter(self.reconnect_delay))
                }
            }
            (Some(Connectivity::Online) | None, Connectivity::Offline) => {
                warn!("Network connection lost, playing from cached content.");
                None
            }
            _ => None,
        }
    }
}

/// Shared HTTP client. Every request is bounded so a server that stops
/// answering surfaces as an error instead of a hang.
pub fn build_http_client(config: &NetworkConfig) -> Result<Client, reqwest::Error> {
    debug!(
        "Building HTTP client: request timeout {:?}, connect timeout {:?}",
        config.request_timeout, config.connect_timeout
    );
    Client::builder().timeout(config.request_timeout).connect_timeout(config.connect_timeout).build()
}

/// Samples whether the backend is reachable.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> Connectivity;
}

/// Probe that sends a HEAD request; any HTTP answer at all counts as online.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self { client, url: url.into(), timeout }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> Connectivity {
        match self.client.head(&self.url).timeout(self.timeout).send().await {
            Ok(response) => {
                debug!("Connectivity probe answered {}", response.status());
                Connectivity::Online
            }
            Err(e) => {
                debug!("Connectivity probe failed: {}", e);
                Connectivity::Offline
            }
        }
    }
}

/// Samples `probe` every `interval` and hands reconnect actions to `on_action`.
pub async fn watch_connectivity<P, F>(
    probe: P,
    mut reactor: NetworkReactor,
    interval: Duration,
    queue_len: Arc<AtomicUsize>,
    mut on_action: F,
) where
    P: ConnectivityProbe,
    F: FnMut(ReactorAction) + Send,
{
    info!("Starting connectivity watcher, probing every {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let status = probe.check().await;
        let queue_is_empty = queue_len.load(Ordering::SeqCst) == 0;
        if let Some(action) = reactor.observe(status, queue_is_empty) {
            on_action(action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const DELAY: Duration = Duration::from_secs(5);

    #[test]
    fn first_sample_only_records_state() {
        let mut reactor = NetworkReactor::new(DELAY);
        assert_eq!(reactor.observe(Connectivity::Online, true), None);
    }

    #[test]
    fn reconnect_with_empty_queue_refreshes_immediately() {
        let mut reactor = NetworkReactor::new(DELAY);
        reactor.observe(Connectivity::Offline, true);
        assert_eq!(reactor.observe(Connectivity::Online, true), Some(ReactorAction::RefreshNow));
    }

    #[test]
    fn reconnect_while_playing_defers_refresh() {
        let mut reactor = NetworkReactor::new(DELAY);
        reactor.observe(Connectivity::Online, false);
        assert_eq!(reactor.observe(Connectivity::Offline, false), None);
        assert_eq!(reactor.observe(Connectivity::Online, false), Some(ReactorAction::RefreshAfter(DELAY)));
        assert_eq!(reactor.observe(Connectivity::Online, false), None);
    }

    struct ScriptedProbe {
        samples: Mutex<Vec<Connectivity>>,
    }

    #[async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn check(&self) -> Connectivity {
            let mut samples = self.samples.lock().unwrap();
            if samples.is_empty() {
                Connectivity::Online
            } else {
                samples.remove(0)
            }
        }
    }

    fn short_timeouts() -> NetworkConfig {
        NetworkConfig {
            probe_url: String::new(),
            probe_interval: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(5),
            reconnect_delay: DELAY,
            request_timeout: Duration::from_millis(300),
            connect_timeout: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn silent_server_fails_the_download_instead_of_hanging() {
        // Accepts connections but never writes a response.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = build_http_client(&short_timeouts()).unwrap();

        let url = format!("http://{}/menu.png", addr);
        let outcome = tokio::time::timeout(Duration::from_secs(10), crate::media_loader::fetch_image(&client, &url)).await;
        assert!(matches!(outcome, Ok(Err(crate::errors::PlaybackError::Download(_)))));

        let url = format!("http://{}/intro.mp4", addr);
        let outcome =
            tokio::time::timeout(Duration::from_secs(10), crate::media_loader::fetch_video_to_temp_file(&client, &url)).await;
        assert!(matches!(outcome, Ok(Err(crate::errors::PlaybackError::Download(_)))));
        drop(listener);
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_reports_each_reconnect_once() {
        let probe = ScriptedProbe {
            samples: Mutex::new(vec![
                Connectivity::Online,
                Connectivity::Offline,
                Connectivity::Offline,
                Connectivity::Online,
            ]),
        };
        let actions = Arc::new(Mutex::new(Vec::new()));
        let recorded = actions.clone();
        let watcher = tokio::spawn(watch_connectivity(
            probe,
            NetworkReactor::new(DELAY),
            Duration::from_secs(15),
            Arc::new(AtomicUsize::new(4)),
            move |action| recorded.lock().unwrap().push(action),
        ));
        tokio::time::sleep(Duration::from_secs(120)).await;
        watcher.abort();
        assert_eq!(*actions.lock().unwrap(), vec![ReactorAction::RefreshAfter(DELAY)]);
    }
}
