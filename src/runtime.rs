//! Wires the scheduler to timers, the fetcher, the gate and the connectivity watcher.
//!
//! The scheduler runs as a single task draining the event channel; everything
//! it asks for is carried out by `CommandExecutor`, whose timers and fetches
//! report back through the same channel.

use chrono::Local;
use log::{debug, info, warn};
use reqwest::Client as ReqwestClient;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;

use super::cache_store::{CacheStore, FileStorage};
use super::clock::SystemClock;
use super::config::{AppConfig, PlaybackConfig};
use super::content_fetcher::ContentFetcher;
use super::firestore_client::FirestoreClient;
use super::hours_gate::{run_gate, BusinessHoursGate};
use super::model::{ContentLists, ContentQueue, Presentation};
use super::network::{watch_connectivity, HttpProbe, NetworkReactor, ReactorAction};
use super::queue_builder;
use super::scheduler::{EventReceiver, EventSender, PlaybackScheduler, SchedulerCommand, SchedulerEvent};

/// Receives whatever the scheduler wants on screen.
pub trait DisplaySink: Send + Sync {
    fn present(&self, presentation: Presentation);
}

/// Carries out `SchedulerCommand`s.
#[derive(Clone)]
pub struct CommandExecutor {
    events: EventSender,
    fetcher: Arc<ContentFetcher>,
    display: Arc<dyn DisplaySink>,
}

impl CommandExecutor {
    pub fn new(events: EventSender, fetcher: Arc<ContentFetcher>, display: Arc<dyn DisplaySink>) -> Self {
        Self { events, fetcher, display }
    }

    pub fn execute(&self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Present(presentation) => self.display.present(presentation),
            SchedulerCommand::StartImageTimer { play_id, after } => {
                self.send_after(after, SchedulerEvent::ImageElapsed { play_id });
            }
            SchedulerCommand::ScheduleRetry { after } => {
                debug!("Retrying content in {:?}", after);
                self.send_after(after, SchedulerEvent::RetryElapsed);
            }
            SchedulerCommand::PrepareContent => self.prepare_content(),
        }
    }

    /// Builds a queue from the cache right away, then from a fresh fetch.
    ///
    /// `ContentUnavailable` is only reported when neither source produced anything.
    pub fn prepare_content(&self) {
        let fetcher = self.fetcher.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let had_cache = match fetcher.cached_content() {
                Some(lists) => {
                    let _ = events.send(SchedulerEvent::QueueReady(queue_from(&lists)));
                    true
                }
                None => false,
            };
            match fetcher.fetch_content().await {
                Ok(lists) => {
                    let _ = events.send(SchedulerEvent::QueueReady(queue_from(&lists)));
                }
                Err(e) if had_cache => warn!("Content refresh failed, staying on cached content: {}", e),
                Err(e) => {
                    warn!("No content available: {}", e);
                    let _ = events.send(SchedulerEvent::ContentUnavailable);
                }
            }
        });
    }

    pub fn on_reactor_action(&self, action: ReactorAction) {
        match action {
            ReactorAction::RefreshNow => self.prepare_content(),
            ReactorAction::RefreshAfter(delay) => {
                let executor = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    executor.prepare_content();
                });
            }
        }
    }

    fn send_after(&self, delay: Duration, event: SchedulerEvent) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
    }
}

fn queue_from(lists: &ContentLists) -> ContentQueue {
    queue_builder::build(&lists.image_refs(), &lists.video_refs())
}

/// Drains the event channel into the scheduler until every sender is gone.
pub async fn run_scheduler(
    mut scheduler: PlaybackScheduler,
    mut events: EventReceiver,
    executor: CommandExecutor,
    queue_len: Arc<AtomicUsize>,
) {
    info!("Playback scheduler started.");
    while let Some(event) = events.recv().await {
        for command in scheduler.handle(event) {
            executor.execute(command);
        }
        queue_len.store(scheduler.session().queue.len(), Ordering::SeqCst);
    }
    info!("Event channel closed, playback scheduler stopped.");
}

/// Starts the scheduler task and asks it for content.
pub fn spawn_playback(
    fetcher: Arc<ContentFetcher>,
    display: Arc<dyn DisplaySink>,
    playback: &PlaybackConfig,
) -> (CommandExecutor, EventSender, Arc<AtomicUsize>) {
    let (tx, rx) = unbounded_channel();
    let queue_len = Arc::new(AtomicUsize::new(0));
    let executor = CommandExecutor::new(tx.clone(), fetcher, display);
    let scheduler = PlaybackScheduler::new(playback.image_duration, playback.empty_retry_delay);
    tokio::spawn(run_scheduler(scheduler, rx, executor.clone(), queue_len.clone()));
    executor.prepare_content();
    (executor, tx, queue_len)
}

/// Builds the whole engine from `config` and starts every background task.
///
/// Returns the event sender the display uses to report playback outcomes.
pub fn start(config: &AppConfig, http_client: ReqwestClient, display: Arc<dyn DisplaySink>) -> EventSender {
    let storage = Arc::new(FileStorage::open(&config.cache.path));
    let cache = Arc::new(CacheStore::new(storage, Arc::new(SystemClock), config.cache.ttl));
    let store = Arc::new(FirestoreClient::new(&config.firestore, http_client.clone()));
    let fetcher = Arc::new(ContentFetcher::new(store, cache, config.retry, config.hours.fallback));

    let (executor, events, queue_len) = spawn_playback(fetcher.clone(), display, &config.playback);

    tokio::spawn(run_gate(
        BusinessHoursGate::new(config.hours.open_days.clone()),
        fetcher,
        config.hours.check_interval,
        config.hours.closed_delay,
        events.clone(),
        || Local::now().naive_local(),
    ));

    let probe = HttpProbe::new(http_client, config.network.probe_url.clone(), config.network.probe_timeout);
    let reactor_executor = executor.clone();
    tokio::spawn(watch_connectivity(
        probe,
        NetworkReactor::new(config.network.reconnect_delay),
        config.network.probe_interval,
        queue_len,
        move |action| reactor_executor.on_reactor_action(action),
    ));

    let refresh_every = config.cache.ttl;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(refresh_every).await;
            info!("Cache lifetime elapsed, refreshing content.");
            executor.prepare_content();
        }
    });

    events
}
