//! In-memory stand-ins for the queue, blob store and compute platform.
//!
//! All three append to one shared call log so tests can assert on the order
//! in which the dispatcher touched them.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use transcode_dispatch::app_state::AppState;
use transcode_dispatch::config::RecordFailurePolicy;
use transcode_dispatch::models::job::{ComputeJob, ComputeState};
use transcode_dispatch::models::message::QueueMessage;
use transcode_dispatch::services::cleanup::SourceCleanup;
use transcode_dispatch::services::compute::{
    ComputePlatform, Launcher, LauncherSettings, ManagedUnit, PlatformError, UnitStatus,
};
use transcode_dispatch::services::dispatcher::{Dispatcher, DispatcherSettings};
use transcode_dispatch::services::queue::{MessageQueue, QueueError};
use transcode_dispatch::services::storage::{BlobStore, StorageError};

use crate::fixtures::OUTPUT_BUCKET;

pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const MAX_WAIT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateUnit { bucket: String, key: String },
    DeleteUnit(String),
    DeleteSource { bucket: String, key: String },
    Acknowledge(String),
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }
}

// Queue

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResponse {
    Accept,
    Expired,
    Fail,
}

pub struct FakeQueue {
    log: CallLog,
    pending: Mutex<VecDeque<QueueMessage>>,
    ack_response: Mutex<AckResponse>,
    receive_fails: AtomicBool,
}

impl FakeQueue {
    pub fn push(&self, message: QueueMessage) {
        self.pending.lock().unwrap().push_back(message);
    }

    pub fn set_ack_response(&self, response: AckResponse) {
        *self.ack_response.lock().unwrap() = response;
    }

    /// Make every receive and depth query fail, as if the queue were unreachable.
    pub fn set_receive_fails(&self, fails: bool) {
        self.receive_fails.store(fails, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageQueue for FakeQueue {
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        if self.receive_fails.load(Ordering::SeqCst) {
            return Err(QueueError::Sqs("connection reset".to_string()));
        }
        let next = self.pending.lock().unwrap().pop_front();
        if next.is_none() {
            // Long poll: an empty queue holds the caller for the full wait.
            tokio::time::sleep(wait).await;
        }
        Ok(next)
    }

    async fn acknowledge(&self, receipt: &str) -> Result<bool, QueueError> {
        self.log.push(Call::Acknowledge(receipt.to_string()));
        match *self.ack_response.lock().unwrap() {
            AckResponse::Accept => Ok(true),
            AckResponse::Expired => Ok(false),
            AckResponse::Fail => Err(QueueError::Sqs("throttled".to_string())),
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        if self.receive_fails.load(Ordering::SeqCst) {
            return Err(QueueError::Sqs("connection reset".to_string()));
        }
        Ok(self.pending.lock().unwrap().len() as u64)
    }
}

// Blob store

pub struct FakeBlobStore {
    log: CallLog,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    failing_deletes: Mutex<HashSet<(String, String)>>,
}

impl FakeBlobStore {
    pub fn fail_delete(&self, bucket: &str, key: &str) {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()));
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::Status {
                bucket: bucket.to_string(),
                key: key.to_string(),
                code: 404,
            })
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.log.push(Call::DeleteSource {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        let id = (bucket.to_string(), key.to_string());
        if self.failing_deletes.lock().unwrap().contains(&id) {
            return Err(StorageError::Status {
                bucket: bucket.to_string(),
                key: key.to_string(),
                code: 503,
            });
        }
        self.objects.lock().unwrap().remove(&id);
        Ok(())
    }
}

// Compute platform

#[derive(Debug, Clone)]
pub enum Step {
    Status(UnitStatus),
    Error,
}

/// How one created unit behaves. The last step repeats forever.
#[derive(Debug, Clone)]
pub struct UnitScript {
    pub create_fails: bool,
    pub steps: Vec<Step>,
}

fn present(state: ComputeState) -> Step {
    Step::Status(UnitStatus::Present {
        state,
        exit_code: None,
    })
}

impl UnitScript {
    pub fn completes() -> Self {
        Self {
            create_fails: false,
            steps: vec![
                present(ComputeState::Submitting),
                present(ComputeState::Running),
                Step::Status(UnitStatus::Present {
                    state: ComputeState::Terminated,
                    exit_code: Some(0),
                }),
            ],
        }
    }

    pub fn never_terminates() -> Self {
        Self {
            create_fails: false,
            steps: vec![present(ComputeState::Submitting), present(ComputeState::Running)],
        }
    }

    pub fn disappears() -> Self {
        Self {
            create_fails: false,
            steps: vec![present(ComputeState::Running), Step::Status(UnitStatus::Absent)],
        }
    }

    pub fn rejected() -> Self {
        Self {
            create_fails: true,
            steps: Vec::new(),
        }
    }

    pub fn status_error() -> Self {
        Self {
            create_fails: false,
            steps: vec![present(ComputeState::Running), Step::Error],
        }
    }
}

pub struct FakePlatform {
    log: CallLog,
    scripts: Mutex<VecDeque<UnitScript>>,
    units: Mutex<HashMap<String, (UnitScript, usize)>>,
    created: Mutex<Vec<ComputeJob>>,
    status_calls: AtomicUsize,
    delete_fails: AtomicBool,
    list_fails: AtomicBool,
    managed: Mutex<Vec<ManagedUnit>>,
}

impl FakePlatform {
    /// Queue the behavior of the next created unit. Units without a queued
    /// script complete normally.
    pub fn script(&self, script: UnitScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn created(&self) -> Vec<ComputeJob> {
        self.created.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn set_delete_fails(&self, fails: bool) {
        self.delete_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_list_fails(&self, fails: bool) {
        self.list_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_managed(&self, units: Vec<ManagedUnit>) {
        *self.managed.lock().unwrap() = units;
    }
}

#[async_trait]
impl ComputePlatform for FakePlatform {
    async fn create(&self, job: &ComputeJob) -> Result<(), PlatformError> {
        self.log.push(Call::CreateUnit {
            bucket: job.descriptor.source_bucket.clone(),
            key: job.descriptor.source_key.clone(),
        });
        self.created.lock().unwrap().push(job.clone());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(UnitScript::completes);
        if script.create_fails {
            return Err(PlatformError::Api {
                status: 409,
                body: "quota exceeded".to_string(),
            });
        }
        self.units.lock().unwrap().insert(job.id.clone(), (script, 0));
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<UnitStatus, PlatformError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut units = self.units.lock().unwrap();
        let Some((script, cursor)) = units.get_mut(name) else {
            return Ok(UnitStatus::Absent);
        };
        let step = script.steps[(*cursor).min(script.steps.len() - 1)].clone();
        *cursor += 1;
        match step {
            Step::Status(status) => Ok(status),
            Step::Error => Err(PlatformError::Api {
                status: 500,
                body: "internal error".to_string(),
            }),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), PlatformError> {
        self.log.push(Call::DeleteUnit(name.to_string()));
        if self.delete_fails.load(Ordering::SeqCst) {
            return Err(PlatformError::Api {
                status: 500,
                body: "delete failed".to_string(),
            });
        }
        self.units.lock().unwrap().remove(name);
        self.managed.lock().unwrap().retain(|unit| unit.name != name);
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<ManagedUnit>, PlatformError> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(PlatformError::Auth("invalid client secret".to_string()));
        }
        Ok(self.managed.lock().unwrap().clone())
    }
}

// Wiring

pub struct Harness {
    pub log: CallLog,
    pub queue: Arc<FakeQueue>,
    pub store: Arc<FakeBlobStore>,
    pub platform: Arc<FakePlatform>,
}

impl Harness {
    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            queue: Arc::new(FakeQueue {
                log: log.clone(),
                pending: Mutex::new(VecDeque::new()),
                ack_response: Mutex::new(AckResponse::Accept),
                receive_fails: AtomicBool::new(false),
            }),
            store: Arc::new(FakeBlobStore {
                log: log.clone(),
                objects: Mutex::new(HashMap::new()),
                failing_deletes: Mutex::new(HashSet::new()),
            }),
            platform: Arc::new(FakePlatform {
                log: log.clone(),
                scripts: Mutex::new(VecDeque::new()),
                units: Mutex::new(HashMap::new()),
                created: Mutex::new(Vec::new()),
                status_calls: AtomicUsize::new(0),
                delete_fails: AtomicBool::new(false),
                list_fails: AtomicBool::new(false),
                managed: Mutex::new(Vec::new()),
            }),
            log,
        }
    }

    pub fn launcher(&self) -> Launcher {
        Launcher::new(
            self.platform.clone(),
            LauncherSettings {
                name_prefix: "transcoder".to_string(),
                poll_interval: POLL_INTERVAL,
                max_wait: MAX_WAIT,
            },
        )
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.queue.clone(),
            self.store.clone(),
            self.platform.clone(),
        )
    }

    pub fn dispatcher(&self, policy: RecordFailurePolicy) -> Dispatcher {
        Dispatcher::new(
            self.queue.clone(),
            self.launcher(),
            SourceCleanup::new(self.store.clone()),
            DispatcherSettings {
                output_bucket: OUTPUT_BUCKET.to_string(),
                receive_wait: Duration::from_secs(20),
                failure_policy: policy,
                receive_count_warn_threshold: 5,
            },
        )
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.calls()
    }

    pub fn acknowledgements(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Acknowledge(_)))
            .count()
    }

    pub fn source_deletes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::DeleteSource { bucket, key } => Some((bucket, key)),
                _ => None,
            })
            .collect()
    }

    pub fn units_created(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateUnit { bucket, key } => Some((bucket, key)),
                _ => None,
            })
            .collect()
    }
}
