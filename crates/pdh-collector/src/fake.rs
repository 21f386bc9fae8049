//! In-memory counter provider.
//!
//! Simulates a host with a configurable set of counter objects and instances,
//! and lets callers inject the faults a real provider can produce. It backs the
//! engine tests and the exporter's simulation mode.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Mutex;

use error_stack::Report;

use crate::error::ProviderError;
use crate::error::ProviderResult;
use crate::provider::CounterProvider;
use crate::provider::Probe;

const STATUS_NO_DATA: u32 = 0x800007D5;
const STATUS_INVALID_DATA: u32 = 0xC0000BC6;
const STATUS_INVALID_HANDLE: u32 = 0xC0000BBC;
const STATUS_NO_OBJECT: u32 = 0xC0000BB8;
const STATUS_NO_COUNTER: u32 = 0xC0000BB9;
const STATUS_NO_INSTANCE: u32 = 0x800007D1;
const STATUS_BAD_PATH: u32 = 0xC0000BC0;

/// Failure injected into the next refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFault {
    Transient,
    SessionClosed,
}

/// Failure injected into wildcard expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionFault {
    /// The measuring call reports a zero length.
    ZeroSize,
    /// The filling call fails.
    FetchFails,
}

#[derive(Debug)]
pub struct FakeSession {
    id: u64,
}

#[derive(Debug)]
pub struct FakeCounter {
    id: u64,
}

#[derive(Debug)]
struct CounterState {
    session: u64,
    path: String,
    object: String,
    instance: Option<String>,
    sampled: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    /// Lowercased object name to instance tokens, in enumeration order.
    objects: HashMap<String, Vec<String>>,
    values: HashMap<String, f64>,
    rejected_counters: HashSet<String>,
    rejected_paths: HashSet<String>,
    failing_reads: HashSet<String>,
    refresh_faults: VecDeque<RefreshFault>,
    expansion_fault: Option<ExpansionFault>,
    unavailable: bool,
    open_sessions: HashSet<u64>,
    counters: HashMap<u64, CounterState>,
    next_id: u64,
    refresh_count: usize,
    sessions_opened: usize,
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Simulated counter provider.
#[derive(Debug, Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider exposing `instances` of a `PhysicalDisk` object.
    pub fn with_disks(instances: &[&str]) -> Self {
        let provider = Self::new();
        provider.set_instances("PhysicalDisk", instances);
        provider
    }

    /// Replaces the instance set of `object`, creating the object if needed.
    pub fn set_instances(&self, object: &str, instances: &[&str]) {
        self.lock()
            .objects
            .insert(
                object.to_lowercase(),
                instances.iter().map(|i| i.to_string()).collect(),
            );
    }

    /// Simulates hot-adding an instance.
    pub fn add_instance(&self, object: &str, instance: &str) {
        self.lock()
            .objects
            .entry(object.to_lowercase())
            .or_default()
            .push(instance.to_string());
    }

    /// Simulates removing an instance, e.g. a disk being unplugged.
    pub fn remove_instance(&self, object: &str, instance: &str) {
        if let Some(instances) = self.lock().objects.get_mut(&object.to_lowercase()) {
            instances.retain(|i| i != instance);
        }
    }

    /// Sets the value every counter of `instance` reports.
    pub fn set_value(&self, instance: &str, value: f64) {
        self.lock().values.insert(instance.to_string(), value);
    }

    /// Makes `add_counter` reject any path naming `counter`.
    pub fn reject_counter(&self, counter: &str) {
        self.lock().rejected_counters.insert(counter.to_lowercase());
    }

    /// Makes `add_counter` reject one concrete, non-wildcard `path`.
    pub fn reject_instance_path(&self, path: &str) {
        self.lock().rejected_paths.insert(path.to_string());
    }

    /// Closes every open session as if the host had invalidated them.
    pub fn lose_sessions(&self) {
        let mut state = self.lock();
        state.open_sessions.clear();
        state.counters.clear();
    }

    /// Makes reads of `instance` fail with a non-stale error.
    pub fn fail_reads(&self, instance: &str) {
        self.lock().failing_reads.insert(instance.to_string());
    }

    /// Queues a failure for the next refresh.
    pub fn fail_next_refresh(&self, fault: RefreshFault) {
        self.lock().refresh_faults.push_back(fault);
    }

    pub fn set_expansion_fault(&self, fault: Option<ExpansionFault>) {
        self.lock().expansion_fault = fault;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Number of counters currently registered across all sessions.
    pub fn live_counters(&self) -> usize {
        self.lock().counters.len()
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions.len()
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    pub fn refresh_count(&self) -> usize {
        self.lock().refresh_count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Splits `\object(instance)\counter` (leading backslash optional).
fn split_path(path: &str) -> Option<(&str, Option<&str>, &str)> {
    let trimmed = path.strip_prefix('\\').unwrap_or(path);
    match trimmed.find('(') {
        Some(open) => {
            let close = open + trimmed[open..].find(')')?;
            let counter = trimmed[close + 1..].strip_prefix('\\')?;
            Some((&trimmed[..open], Some(&trimmed[open + 1..close]), counter))
        }
        None => {
            let (object, counter) = trimmed.split_once('\\')?;
            Some((object, None, counter))
        }
    }
}

fn invalid_path(path: &str, status: u32) -> Report<ProviderError> {
    Report::new(ProviderError::InvalidPath {
        path: path.to_string(),
        status,
    })
}

impl CounterProvider for FakeProvider {
    type Session = FakeSession;
    type Counter = FakeCounter;

    fn open_session(&self) -> ProviderResult<FakeSession> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(Report::new(ProviderError::Unavailable {
                reason: "simulated provider disabled".to_string(),
            }));
        }
        let id = state.next_id();
        state.open_sessions.insert(id);
        state.sessions_opened += 1;
        Ok(FakeSession { id })
    }

    fn add_counter(&self, session: &FakeSession, path: &str) -> ProviderResult<FakeCounter> {
        let mut state = self.lock();
        if !state.open_sessions.contains(&session.id) {
            return Err(Report::new(ProviderError::SessionClosed));
        }

        let (object, instance, counter) =
            split_path(path).ok_or_else(|| invalid_path(path, STATUS_BAD_PATH))?;
        let object = object.to_lowercase();
        let Some(instances) = state.objects.get(&object) else {
            return Err(invalid_path(path, STATUS_NO_OBJECT));
        };
        if state.rejected_counters.contains(&counter.to_lowercase()) {
            return Err(invalid_path(path, STATUS_NO_COUNTER));
        }
        let instance = match instance {
            Some("*") | None => None,
            Some(token) if instances.iter().any(|i| i == token) => Some(token.to_string()),
            Some(_) => return Err(invalid_path(path, STATUS_NO_INSTANCE)),
        };
        if instance.is_some() && state.rejected_paths.contains(path) {
            return Err(invalid_path(path, STATUS_BAD_PATH));
        }

        let id = state.next_id();
        state.counters.insert(id, CounterState {
            session: session.id,
            path: path.to_string(),
            object,
            instance,
            sampled: false,
        });
        Ok(FakeCounter { id })
    }

    fn remove_counter(&self, counter: FakeCounter) {
        self.lock().counters.remove(&counter.id);
    }

    fn refresh(&self, session: &FakeSession) -> ProviderResult<()> {
        let mut state = self.lock();
        if !state.open_sessions.contains(&session.id) {
            return Err(Report::new(ProviderError::SessionClosed));
        }
        match state.refresh_faults.pop_front() {
            Some(RefreshFault::Transient) => {
                return Err(Report::new(ProviderError::TransientSample {
                    status: STATUS_NO_DATA,
                }));
            }
            Some(RefreshFault::SessionClosed) => {
                state.open_sessions.remove(&session.id);
                state.counters.retain(|_, c| c.session != session.id);
                return Err(Report::new(ProviderError::SessionClosed));
            }
            None => {}
        }

        for counter in state.counters.values_mut() {
            if counter.session == session.id {
                counter.sampled = true;
            }
        }
        state.refresh_count += 1;
        Ok(())
    }

    fn read_value(&self, counter: &FakeCounter) -> ProviderResult<f64> {
        let state = self.lock();
        let Some(counter) = state.counters.get(&counter.id) else {
            return Err(Report::new(ProviderError::Call {
                call: "read_value",
                status: STATUS_INVALID_HANDLE,
            }));
        };
        let Some(instance) = counter.instance.as_deref() else {
            return Err(Report::new(ProviderError::Call {
                call: "read_value",
                status: STATUS_INVALID_DATA,
            }));
        };

        let present = state
            .objects
            .get(&counter.object)
            .is_some_and(|instances| instances.iter().any(|i| i == instance));
        if !present {
            return Err(Report::new(ProviderError::StaleHandle));
        }
        if !counter.sampled || state.failing_reads.contains(instance) {
            return Err(Report::new(ProviderError::Call {
                call: "read_value",
                status: STATUS_INVALID_DATA,
            }));
        }

        Ok(state.values.get(instance).copied().unwrap_or_default())
    }

    fn close_session(&self, session: &mut FakeSession) {
        let mut state = self.lock();
        if state.open_sessions.remove(&session.id) {
            state.counters.retain(|_, c| c.session != session.id);
        }
    }

    fn counter_info(&self, counter: &FakeCounter, buffer: &mut [u8]) -> Probe {
        let state = self.lock();
        let Some(counter) = state.counters.get(&counter.id) else {
            return Probe::Failed(Report::new(ProviderError::Call {
                call: "counter_info",
                status: STATUS_INVALID_HANDLE,
            }));
        };
        let record = counter.path.as_bytes();
        if buffer.len() < record.len() {
            return Probe::MoreData {
                required: record.len(),
            };
        }
        buffer[..record.len()].copy_from_slice(record);
        Probe::Filled(record.len())
    }

    fn info_full_path(&self, record: &[u8]) -> ProviderResult<String> {
        String::from_utf8(record.to_vec()).map_err(|e| {
            Report::new(ProviderError::Call {
                call: "info_full_path",
                status: STATUS_INVALID_DATA,
            })
            .attach_printable(e.to_string())
        })
    }

    fn expand_wildcard(&self, path: &str, buffer: &mut [u16]) -> Probe {
        let state = self.lock();
        let Some((object, Some(selector), counter)) = split_path(path) else {
            return Probe::Failed(invalid_path(path, STATUS_BAD_PATH));
        };
        let Some(instances) = state.objects.get(&object.to_lowercase()) else {
            return Probe::Failed(invalid_path(path, STATUS_NO_OBJECT));
        };

        let prefix = if path.starts_with('\\') { "\\" } else { "" };
        let mut packed: Vec<u16> = Vec::new();
        for instance in instances {
            if selector != "*" && selector != instance {
                continue;
            }
            packed.extend(format!(r"{prefix}{object}({instance})\{counter}").encode_utf16());
            packed.push(0);
        }
        packed.push(0);

        match state.expansion_fault {
            Some(ExpansionFault::ZeroSize) if buffer.is_empty() => {
                return Probe::MoreData { required: 0 };
            }
            Some(ExpansionFault::FetchFails) if !buffer.is_empty() => {
                return Probe::Failed(Report::new(ProviderError::Call {
                    call: "expand_wildcard",
                    status: STATUS_INVALID_DATA,
                }));
            }
            _ => {}
        }

        if buffer.len() < packed.len() {
            return Probe::MoreData {
                required: packed.len(),
            };
        }
        buffer[..packed.len()].copy_from_slice(&packed);
        Probe::Filled(packed.len())
    }
}
