//! Business-hours gate: decides whether the board shows content or sleeps.

use chrono::{Datelike, NaiveDateTime, Timelike};
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::content_fetcher::{ContentFetcher, HoursSource};
use super::model::{BusinessHours, GateState};
use super::scheduler::{EventSender, SchedulerEvent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusinessHoursGate {
    /// Weekdays, 0 = Sunday through 6 = Saturday.
    open_days: BTreeSet<u32>,
}

impl BusinessHoursGate {
    pub fn new(open_days: BTreeSet<u32>) -> Self {
        Self { open_days }
    }

    /// Open iff today is an open day and `open <= now < close`.
    pub fn evaluate(&self, now: NaiveDateTime, hours: &BusinessHours) -> GateState {
        let weekday = now.weekday().num_days_from_sunday();
        if !self.open_days.contains(&weekday) {
            return GateState::Closed;
        }
        let minute_of_day = now.hour() * 60 + now.minute();
        if minute_of_day >= hours.open_minutes() && minute_of_day < hours.close_minutes() {
            GateState::Open
        } else {
            GateState::Closed
        }
    }
}

type HoursSnapshot = Arc<Mutex<Option<BusinessHours>>>;

/// Records `hours` unless they are only the fallback and real hours are already known.
fn offer_hours(snapshot: &HoursSnapshot, hours: BusinessHours, source: HoursSource) {
    let mut current = snapshot.lock().unwrap_or_else(PoisonError::into_inner);
    if source == HoursSource::Fallback && current.is_some() {
        debug!("Keeping last known business hours instead of the fallback window.");
        return;
    }
    *current = Some(hours);
}

/// Re-evaluates the gate every `check_interval` and reports transitions to the scheduler.
///
/// Hours are refreshed in the background on every tick. Only the very first
/// evaluation waits for them, and only when nothing is cached.
pub async fn run_gate<N>(
    gate: BusinessHoursGate,
    fetcher: Arc<ContentFetcher>,
    check_interval: Duration,
    closed_delay: Duration,
    events: EventSender,
    now: N,
) where
    N: Fn() -> NaiveDateTime + Send,
{
    info!("Starting business-hours gate, checking every {:?}", check_interval);
    let snapshot: HoursSnapshot = Arc::new(Mutex::new(None));
    let mut ticker = tokio::time::interval(check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_state: Option<GateState> = None;

    loop {
        ticker.tick().await;

        let have_hours = snapshot.lock().unwrap_or_else(PoisonError::into_inner).is_some();
        if !have_hours {
            if let Some(cached) = fetcher.cached_business_hours() {
                offer_hours(&snapshot, cached, HoursSource::Cached);
            }
        }
        let known = snapshot.lock().unwrap_or_else(PoisonError::into_inner).is_some();
        if known {
            let fetcher = fetcher.clone();
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                fetcher.fetch_business_hours(|hours, source| offer_hours(&snapshot, hours, source)).await;
            });
        } else {
            debug!("No business hours known yet, waiting for the first fetch.");
            fetcher.fetch_business_hours(|hours, source| offer_hours(&snapshot, hours, source)).await;
        }

        let Some(hours) = *snapshot.lock().unwrap_or_else(PoisonError::into_inner) else {
            continue;
        };
        let state = gate.evaluate(now(), &hours);
        if last_state == Some(state) {
            continue;
        }
        info!("Business hours {} evaluated as {:?}", hours, state);
        last_state = Some(state);
        if state == GateState::Closed {
            tokio::time::sleep(closed_delay).await;
        }
        if events.send(SchedulerEvent::GateChanged(state)).is_err() {
            info!("Scheduler has stopped, ending business-hours gate.");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_store::{CacheStore, MemoryStorage};
    use crate::clock::ManualClock;
    use crate::errors::FetchError;
    use crate::firestore_client::{DocumentStore, StoreDocument};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        // June 2024: the 5th is a Wednesday, the 3rd a Monday.
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap().and_hms_opt(hour, minute, 0).unwrap()
    }

    fn default_gate() -> BusinessHoursGate {
        BusinessHoursGate::new(BTreeSet::from([0, 3, 4, 5, 6]))
    }

    #[test]
    fn boundaries_are_inclusive_open_exclusive_close() {
        let gate = default_gate();
        let hours = BusinessHours::from_packed(700, 2000).unwrap();
        assert_eq!(gate.evaluate(at(5, 6, 59), &hours), GateState::Closed);
        assert_eq!(gate.evaluate(at(5, 7, 0), &hours), GateState::Open);
        assert_eq!(gate.evaluate(at(5, 19, 59), &hours), GateState::Open);
        assert_eq!(gate.evaluate(at(5, 20, 0), &hours), GateState::Closed);
    }

    #[test]
    fn closed_on_days_outside_the_open_set() {
        let gate = default_gate();
        let hours = BusinessHours::from_packed(700, 2000).unwrap();
        assert_eq!(gate.evaluate(at(3, 12, 0), &hours), GateState::Closed);
        assert_eq!(gate.evaluate(at(2, 12, 0), &hours), GateState::Open);
    }

    #[test]
    fn minutes_are_respected() {
        let gate = BusinessHoursGate::new(BTreeSet::from([0, 1, 2, 3, 4, 5, 6]));
        let hours = BusinessHours::from_packed(730, 1945).unwrap();
        assert_eq!(gate.evaluate(at(4, 7, 29), &hours), GateState::Closed);
        assert_eq!(gate.evaluate(at(4, 7, 30), &hours), GateState::Open);
        assert_eq!(gate.evaluate(at(4, 19, 44), &hours), GateState::Open);
        assert_eq!(gate.evaluate(at(4, 19, 45), &hours), GateState::Closed);
    }

    struct OfflineStore;

    #[async_trait]
    impl DocumentStore for OfflineStore {
        async fn list_collection(&self, _collection: &str) -> Result<Vec<StoreDocument>, FetchError> {
            Err(FetchError::MalformedRecord("offline".into()))
        }
        async fn get_document(&self, _collection: &str, _id: &str) -> Result<Option<StoreDocument>, FetchError> {
            Err(FetchError::MalformedRecord("offline".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gate_loop_reports_closed_with_fallback_hours() {
        let cache = Arc::new(CacheStore::new(
            Arc::new(MemoryStorage::default()),
            Arc::new(ManualClock::new(chrono::Utc::now())),
            Duration::from_secs(1800),
        ));
        let fetcher = Arc::new(ContentFetcher::new(
            Arc::new(OfflineStore),
            cache,
            RetryPolicy::default(),
            BusinessHours::from_packed(700, 2000).unwrap(),
        ));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let gate_task = tokio::spawn(run_gate(
            default_gate(),
            fetcher,
            Duration::from_secs(60),
            Duration::from_secs(3),
            tx,
            || at(5, 21, 0),
        ));
        assert_eq!(rx.recv().await, Some(SchedulerEvent::GateChanged(GateState::Closed)));
        // Later ticks with the same outcome report nothing new.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(rx.try_recv().is_err());
        gate_task.abort();
    }

    struct SwitchableStore {
        offline: AtomicBool,
        open_time: i64,
        close_time: i64,
    }

    #[async_trait]
    impl DocumentStore for SwitchableStore {
        async fn list_collection(&self, _collection: &str) -> Result<Vec<StoreDocument>, FetchError> {
            Ok(Vec::new())
        }
        async fn get_document(&self, _collection: &str, id: &str) -> Result<Option<StoreDocument>, FetchError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(FetchError::Status {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    message: "offline".into(),
                });
            }
            let mut fields = Map::new();
            fields.insert("openTime".into(), json!(self.open_time));
            fields.insert("closeTime".into(), json!(self.close_time));
            Ok(Some(StoreDocument { id: id.into(), fields }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn known_hours_outlive_the_cache_while_offline() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let cache = Arc::new(CacheStore::new(
            Arc::new(MemoryStorage::default()),
            clock.clone(),
            Duration::from_secs(1800),
        ));
        let store = Arc::new(SwitchableStore { offline: AtomicBool::new(false), open_time: 900, close_time: 1700 });
        let fetcher = Arc::new(ContentFetcher::new(
            store.clone(),
            cache,
            RetryPolicy::default(),
            BusinessHours::from_packed(700, 2000).unwrap(),
        ));
        let wall = Arc::new(Mutex::new(at(5, 8, 0)));
        let gate_wall = wall.clone();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let gate_task = tokio::spawn(run_gate(
            default_gate(),
            fetcher,
            Duration::from_secs(60),
            Duration::from_secs(3),
            tx,
            move || *gate_wall.lock().unwrap(),
        ));
        assert_eq!(rx.recv().await, Some(SchedulerEvent::GateChanged(GateState::Closed)));

        // 08:00 is inside the fallback window but before the real opening time.
        store.offline.store(true, Ordering::SeqCst);
        clock.advance(chrono::Duration::minutes(40));
        tokio::time::sleep(Duration::from_secs(40 * 60)).await;
        assert!(rx.try_recv().is_err());

        *wall.lock().unwrap() = at(5, 9, 30);
        assert_eq!(rx.recv().await, Some(SchedulerEvent::GateChanged(GateState::Open)));
        gate_task.abort();
    }
}
