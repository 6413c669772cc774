//! In-memory test doubles for the boundary traits.

use crate::{
    Identity, LifecycleEvent, LifecycleFeed, LifecycleSubscription, NavigateOptions, Navigator,
    NotificationKind, Notifier, ProfileRecord, ProfileStore, Route, ServiceError,
    SessionService, StoreError, UNIQUE_VIOLATION_CODE,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Poll `condition` while yielding to other tasks. Returns false if it never held.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..1_000 {
        if condition() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    condition()
}

/// Scriptable session service backed by a [`LifecycleFeed`].
pub struct MockSessionService {
    feed: LifecycleFeed,
    current: Mutex<Option<Identity>>,
    responses: Mutex<VecDeque<Result<Option<Identity>, ServiceError>>>,
    get_session_delay: Mutex<Option<Duration>>,
    sign_out_failure: Mutex<Option<ServiceError>>,
    get_session_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    clear_cached_calls: AtomicUsize,
}

impl MockSessionService {
    pub fn new() -> Self {
        Self {
            feed: LifecycleFeed::default(),
            current: Mutex::new(None),
            responses: Mutex::new(VecDeque::new()),
            get_session_delay: Mutex::new(None),
            sign_out_failure: Mutex::new(None),
            get_session_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            clear_cached_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_session(identity: Identity) -> Self {
        let service = Self::new();
        *service.current.lock().unwrap() = Some(identity);
        service
    }

    /// Queue a one-shot `get_session` result, consumed before the current session.
    pub fn push_get_session(&self, result: Result<Option<Identity>, ServiceError>) {
        self.responses.lock().unwrap().push_back(result);
    }

    pub fn set_get_session_delay(&self, delay: Duration) {
        *self.get_session_delay.lock().unwrap() = Some(delay);
    }

    /// Make the next `sign_out` fail without emitting an event.
    pub fn fail_sign_out(&self, error: ServiceError) {
        *self.sign_out_failure.lock().unwrap() = Some(error);
    }

    pub fn emit(&self, event: LifecycleEvent) -> usize {
        *self.current.lock().unwrap() = event.identity.clone();
        self.feed.emit(event)
    }

    pub fn subscriber_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    pub fn get_session_calls(&self) -> usize {
        self.get_session_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn clear_cached_calls(&self) -> usize {
        self.clear_cached_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionService for MockSessionService {
    async fn get_session(&self) -> Result<Option<Identity>, ServiceError> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.get_session_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.current.lock().unwrap().clone()),
        }
    }

    async fn sign_out(&self) -> Result<(), ServiceError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);

        let failure = self.sign_out_failure.lock().unwrap().take();
        if let Some(error) = failure {
            return Err(error);
        }

        self.emit(LifecycleEvent::signed_out());
        Ok(())
    }

    fn subscribe(&self) -> LifecycleSubscription {
        self.feed.subscribe()
    }

    fn clear_cached_session(&self) {
        self.clear_cached_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Releases selects held by [`MemoryProfileStore::pause_selects`].
pub struct SelectGate {
    tx: watch::Sender<bool>,
}

impl SelectGate {
    pub fn release(&self) {
        self.tx.send_replace(true);
    }
}

/// Profile store over a `HashMap`, with failure injection.
pub struct MemoryProfileStore {
    rows: Mutex<HashMap<String, ProfileRecord>>,
    select_failures: Mutex<VecDeque<StoreError>>,
    insert_failures: Mutex<VecDeque<StoreError>>,
    gate: Mutex<Option<watch::Receiver<bool>>>,
    select_calls: AtomicUsize,
    insert_calls: AtomicUsize,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            select_failures: Mutex::new(VecDeque::new()),
            insert_failures: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
            select_calls: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
        }
    }

    pub fn seed(&self, record: ProfileRecord) {
        self.rows.lock().unwrap().insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<ProfileRecord> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn fail_next_select(&self, error: StoreError) {
        self.select_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_insert(&self, error: StoreError) {
        self.insert_failures.lock().unwrap().push_back(error);
    }

    /// Hold every `select` until the returned gate is released.
    pub fn pause_selects(&self) -> SelectGate {
        let (tx, rx) = watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        SelectGate { tx }
    }

    pub async fn wait_for_select_calls(&self, n: usize) {
        assert!(wait_until(|| self.select_calls() >= n).await);
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn select(&self, id: &str) -> Result<Option<ProfileRecord>, StoreError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut rx) = gate {
            let _ = rx.wait_for(|open| *open).await;
        }

        if let Some(error) = self.select_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.get(id))
    }

    async fn insert(&self, record: &ProfileRecord) -> Result<(), StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.insert_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&record.id) {
            return Err(StoreError::api(
                Some(409),
                Some(UNIQUE_VIOLATION_CODE),
                "duplicate key value violates unique constraint \"profiles_pkey\"",
            ));
        }
        rows.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn upsert(&self, record: &ProfileRecord) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    navigations: Mutex<Vec<(Route, NavigateOptions)>>,
}

impl RecordingNavigator {
    pub fn navigations(&self) -> Vec<(Route, NavigateOptions)> {
        self.navigations.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route, options: NavigateOptions) {
        self.navigations.lock().unwrap().push((route, options));
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<(NotificationKind, String)>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<(NotificationKind, String)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.of_kind(NotificationKind::Error)
    }

    pub fn successes(&self) -> Vec<String> {
        self.of_kind(NotificationKind::Success)
    }

    fn of_kind(&self, kind: NotificationKind) -> Vec<String> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotificationKind, message: &str) {
        self.notifications
            .lock()
            .unwrap()
            .push((kind, message.to_string()));
    }
}
