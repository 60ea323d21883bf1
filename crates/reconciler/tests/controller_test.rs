//! End-to-end controller tests against the in-memory store.
//!
//! Covers:
//! - Pre-existing and newly created objects converge
//! - Spec changes and deletions are picked up through the watch
//! - Failing reads are retried with backoff until they succeed
//! - A watch that ends stops the controller
//! - Registration against a closed or mismatched source is fatal
//! - An out-of-range timeout from the environment is rejected, not a crash

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use registrar_core::{CancelToken, ObjectKey, Resource};
use registrar_reconciler::kinds::{Guestbook, Student, StudentSpec};
use registrar_reconciler::config::ENV_RECONCILE_TIMEOUT_SECS;
use registrar_reconciler::{
    BackoffPolicy, Controller, ControllerConfig, Error, LoopConfig, LoopStats, Reconciler,
};
use registrar_store::{
    Fetched, InMemoryStore, ObjectStore, StoreError, WatchBus, WatchSource, WatchSubscription,
};

fn loop_config() -> LoopConfig {
    LoopConfig {
        workers: 2,
        reconcile_timeout: Duration::from_secs(5),
        backoff: BackoffPolicy::default()
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(50)),
    }
}

fn student(name: &str, grades: &[i32]) -> Resource<Student> {
    Resource::new(&ObjectKey::new("school", name), StudentSpec::new(name, grades))
}

async fn graduate(store: &InMemoryStore<Student>, name: &str) -> Option<bool> {
    store
        .get(&ObjectKey::new("school", name), &CancelToken::never())
        .await
        .unwrap()
        .into_option()
        .map(|resource| resource.status.graduate)
}

/// Poll until `name` has the expected `graduate` flag, or give up.
async fn wait_for_graduate(store: &InMemoryStore<Student>, name: &str, expected: bool) -> bool {
    for _ in 0..500 {
        if graduate(store, name).await == Some(expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn start(
    store: Arc<InMemoryStore<Student>>,
    reconcile_store: Arc<dyn ObjectStore<Student>>,
) -> (
    registrar_reconciler::LoopStopper,
    tokio::task::JoinHandle<LoopStats>,
) {
    let reconciler = Arc::new(
        Reconciler::<Student>::builder()
            .with_store(reconcile_store)
            .build()
            .unwrap(),
    );
    let controller = Controller::register(reconciler, store, loop_config())
        .await
        .unwrap();
    let stopper = controller.stopper();
    (stopper, tokio::spawn(controller.run()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_converges_existing_and_new_objects() {
    // GIVEN: Two students stored before the controller starts
    let store = InMemoryStore::<Student>::new_arc();
    store.create(student("alice", &[4, 4, 4])).await.unwrap();
    store.create(student("bob", &[1, 2])).await.unwrap();
    let before_bob = store
        .get(&ObjectKey::new("school", "bob"), &CancelToken::never())
        .await
        .unwrap()
        .into_option()
        .unwrap();

    // WHEN: The controller runs and a third student is added later
    let (stopper, running) = start(store.clone(), store.clone()).await;
    assert!(wait_for_graduate(&store, "alice", true).await);
    store.create(student("carol", &[3, 3, 3, 3])).await.unwrap();

    // THEN: Every student converges; bob needed no write
    assert!(wait_for_graduate(&store, "carol", true).await);
    assert_eq!(graduate(&store, "bob").await, Some(false));
    let after_bob = store
        .get(&ObjectKey::new("school", "bob"), &CancelToken::never())
        .await
        .unwrap()
        .into_option()
        .unwrap();
    assert_eq!(
        after_bob.metadata.resource_version,
        before_bob.metadata.resource_version
    );

    stopper.stop();
    let stats = running.await.unwrap();
    assert!(stats.reconciled >= 3);
    assert_eq!(stats.failed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_follows_spec_changes_and_deletes() {
    // GIVEN: A running controller with one graduated student
    let store = InMemoryStore::<Student>::new_arc();
    store.create(student("alice", &[5, 5])).await.unwrap();
    let (stopper, running) = start(store.clone(), store.clone()).await;
    assert!(wait_for_graduate(&store, "alice", true).await);

    // WHEN: Her grades drop
    store.apply(student("alice", &[1, 1])).await.unwrap();

    // THEN: The status follows
    assert!(wait_for_graduate(&store, "alice", false).await);

    // WHEN: She is deleted
    store
        .delete(&ObjectKey::new("school", "alice"))
        .await
        .unwrap();

    // THEN: The controller keeps running and stops cleanly
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!running.is_finished());
    stopper.stop();
    let stats = running.await.unwrap();
    assert_eq!(stats.failed, 0);
}

/// Fails the first `failures` reads, then delegates.
struct FlakyStore {
    inner: Arc<InMemoryStore<Student>>,
    failures: AtomicUsize,
}

#[async_trait]
impl ObjectStore<Student> for FlakyStore {
    async fn get(
        &self,
        key: &ObjectKey,
        cancel: &CancelToken,
    ) -> registrar_store::Result<Fetched<Student>> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::unavailable("get", "flaky backend"));
        }
        self.inner.get(key, cancel).await
    }

    async fn update_status(
        &self,
        resource: &Resource<Student>,
        cancel: &CancelToken,
    ) -> registrar_store::Result<Resource<Student>> {
        self.inner.update_status(resource, cancel).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_reconciles_are_retried_with_backoff() {
    // GIVEN: A backend that fails the first three reads
    let store = InMemoryStore::<Student>::new_arc();
    store.create(student("alice", &[4])).await.unwrap();
    let flaky = Arc::new(FlakyStore {
        inner: store.clone(),
        failures: AtomicUsize::new(3),
    });

    // WHEN: The controller runs
    let (stopper, running) = start(store.clone(), flaky).await;

    // THEN: It retries until the status is written
    assert!(wait_for_graduate(&store, "alice", true).await);
    stopper.stop();
    let stats = running.await.unwrap();
    assert_eq!(stats.failed, 3);
}

#[tokio::test]
async fn test_register_fails_on_closed_source() {
    // GIVEN: A store whose watch bus is closed
    let store = InMemoryStore::<Student>::new_arc();
    store.bus().close();
    let reconciler = Arc::new(
        Reconciler::<Student>::builder()
            .with_store(store.clone())
            .build()
            .unwrap(),
    );

    // WHEN: Registering a controller against it
    let result = Controller::register(reconciler, store, loop_config()).await;

    // THEN: Registration fails fatally
    let err = result.err().expect("registration should fail");
    assert!(matches!(err, Error::RegistrationFailed { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_register_rejects_other_kind() {
    // GIVEN: A guestbook store and a student reconciler
    let guestbooks: Arc<dyn WatchSource> = InMemoryStore::<Guestbook>::new_arc();
    let students = InMemoryStore::<Student>::new_arc();
    let reconciler = Arc::new(
        Reconciler::<Student>::builder()
            .with_store(students)
            .build()
            .unwrap(),
    );

    // WHEN: Registering the student controller on the guestbook watch
    let result = Controller::register(reconciler, guestbooks, loop_config()).await;

    // THEN: Registration fails fatally
    let err = result.err().expect("registration should fail");
    assert!(err.is_fatal());
    assert!(err.to_string().contains("Guestbook"));
}

#[tokio::test]
async fn test_register_rejects_invalid_config() {
    let store = InMemoryStore::<Student>::new_arc();
    let reconciler = Arc::new(
        Reconciler::<Student>::builder()
            .with_store(store.clone())
            .build()
            .unwrap(),
    );
    let config = LoopConfig {
        workers: 0,
        ..loop_config()
    };

    let result = Controller::register(reconciler, store, config).await;

    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
}

/// A watch source whose event stream can be cut off.
struct SeveredSource {
    bus: Mutex<Option<WatchBus>>,
}

impl SeveredSource {
    fn new() -> Self {
        Self {
            bus: Mutex::new(Some(WatchBus::new())),
        }
    }

    fn sever(&self) {
        self.bus.lock().unwrap().take();
    }
}

#[async_trait]
impl WatchSource for SeveredSource {
    fn kind(&self) -> &'static str {
        "Student"
    }

    fn watch(&self) -> registrar_store::Result<WatchSubscription> {
        match self.bus.lock().unwrap().as_ref() {
            Some(bus) => bus.subscribe(),
            None => Err(StoreError::WatchClosed),
        }
    }

    async fn list_keys(&self, _cancel: &CancelToken) -> registrar_store::Result<Vec<ObjectKey>> {
        Ok(Vec::new())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_stops_when_watch_ends() {
    // GIVEN: A running controller on a source that can be cut off
    let store = InMemoryStore::<Student>::new_arc();
    let source = Arc::new(SeveredSource::new());
    let reconciler = Arc::new(
        Reconciler::<Student>::builder()
            .with_store(store)
            .build()
            .unwrap(),
    );
    let controller = Controller::register(reconciler, source.clone(), loop_config())
        .await
        .unwrap();
    let stopper = controller.stopper();
    let running = tokio::spawn(controller.run());

    // WHEN: The event stream ends
    source.sever();

    // THEN: The controller stops by itself and reports it through the stopper
    let stats = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("controller should stop once its watch ends")
        .unwrap();
    assert!(stopper.is_stopped());
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_register_rejects_unbounded_timeout_from_env() {
    // GIVEN: A reconcile timeout override far beyond any representable deadline
    let config = ControllerConfig::default()
        .with_env_overrides(|name| {
            (name == ENV_RECONCILE_TIMEOUT_SECS).then(|| u64::MAX.to_string())
        })
        .unwrap();
    let store = InMemoryStore::<Student>::new_arc();
    store.create(student("alice", &[4])).await.unwrap();
    let reconciler = Arc::new(
        Reconciler::<Student>::builder()
            .with_store(store.clone())
            .build()
            .unwrap(),
    );

    // WHEN: Registering a controller with it
    let result = Controller::register(reconciler, store, config.loop_config()).await;

    // THEN: Registration returns a config error instead of crashing
    assert!(config.validate().is_err());
    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
}
