//! [`CounterProvider`] backed by the Windows Performance Data Helper library.

use std::mem;
use std::ptr;

use error_stack::Report;
use windows_sys::Win32::System::Performance::PdhAddEnglishCounterW;
use windows_sys::Win32::System::Performance::PdhCloseQuery;
use windows_sys::Win32::System::Performance::PdhCollectQueryData;
use windows_sys::Win32::System::Performance::PdhExpandWildCardPathW;
use windows_sys::Win32::System::Performance::PdhGetCounterInfoW;
use windows_sys::Win32::System::Performance::PdhGetFormattedCounterValue;
use windows_sys::Win32::System::Performance::PdhOpenQueryW;
use windows_sys::Win32::System::Performance::PdhRemoveCounter;
use windows_sys::Win32::System::Performance::PDH_COUNTER_INFO_W;
use windows_sys::Win32::System::Performance::PDH_CSTATUS_NEW_DATA;
use windows_sys::Win32::System::Performance::PDH_CSTATUS_NO_INSTANCE;
use windows_sys::Win32::System::Performance::PDH_CSTATUS_NO_OBJECT;
use windows_sys::Win32::System::Performance::PDH_CSTATUS_VALID_DATA;
use windows_sys::Win32::System::Performance::PDH_FMT_COUNTERVALUE;
use windows_sys::Win32::System::Performance::PDH_FMT_DOUBLE;
use windows_sys::Win32::System::Performance::PDH_INVALID_HANDLE;
use windows_sys::Win32::System::Performance::PDH_MORE_DATA;

use crate::error::ProviderError;
use crate::error::ProviderResult;
use crate::provider::CounterProvider;
use crate::provider::Probe;

const SUCCESS: u32 = 0;
const MORE_DATA: u32 = PDH_MORE_DATA as u32;
const INVALID_HANDLE: u32 = PDH_INVALID_HANDLE as u32;
const NO_INSTANCE: u32 = PDH_CSTATUS_NO_INSTANCE as u32;
const NO_OBJECT: u32 = PDH_CSTATUS_NO_OBJECT as u32;
const VALID_DATA: u32 = PDH_CSTATUS_VALID_DATA as u32;
const NEW_DATA: u32 = PDH_CSTATUS_NEW_DATA as u32;

/// PDH query handle.
#[derive(Debug)]
pub struct PdhSession {
    query: isize,
    open: bool,
}

/// PDH counter handle.
#[derive(Debug)]
pub struct PdhCounter {
    handle: isize,
}

/// Local-machine PDH provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdhProvider;

impl PdhProvider {
    pub fn new() -> Self {
        Self
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Reads a NUL-terminated UTF-16 string.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated UTF-16 string.
unsafe fn read_wide(ptr: *const u16) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    Some(String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len)))
}

fn is_gone(status: u32) -> bool {
    status == NO_INSTANCE || status == NO_OBJECT
}

fn probe(call: &'static str, status: u32, required: u32, capacity: usize) -> Probe {
    match status {
        SUCCESS => Probe::Filled((required as usize).min(capacity)),
        MORE_DATA => Probe::MoreData {
            required: required as usize,
        },
        // An absent object or instance means nothing to expand.
        status if capacity == 0 && is_gone(status) => Probe::Filled(0),
        status => Probe::Failed(Report::new(ProviderError::Call { call, status })),
    }
}

impl CounterProvider for PdhProvider {
    type Session = PdhSession;
    type Counter = PdhCounter;

    fn open_session(&self) -> ProviderResult<PdhSession> {
        let mut query = 0;
        // SAFETY: a null data source selects real-time data; `query` is a valid out pointer.
        let status = unsafe { PdhOpenQueryW(ptr::null(), 0, &mut query) };
        if status != SUCCESS {
            return Err(Report::new(ProviderError::Unavailable {
                reason: format!("PdhOpenQueryW returned {status:#X}"),
            }));
        }
        Ok(PdhSession { query, open: true })
    }

    #[tracing::instrument(level = "trace", skip(self, session))]
    fn add_counter(&self, session: &PdhSession, path: &str) -> ProviderResult<PdhCounter> {
        if !session.open {
            return Err(Report::new(ProviderError::SessionClosed));
        }
        let path_w = wide(path);
        let mut handle = 0;
        // SAFETY: `path_w` is NUL-terminated and outlives the call.
        let status = unsafe { PdhAddEnglishCounterW(session.query, path_w.as_ptr(), 0, &mut handle) };
        match status {
            SUCCESS => Ok(PdhCounter { handle }),
            INVALID_HANDLE => Err(Report::new(ProviderError::SessionClosed)),
            status => Err(Report::new(ProviderError::InvalidPath {
                path: path.to_string(),
                status,
            })),
        }
    }

    fn remove_counter(&self, counter: PdhCounter) {
        // SAFETY: the handle came from PdhAddEnglishCounterW and is consumed here.
        let status = unsafe { PdhRemoveCounter(counter.handle) };
        if status != SUCCESS {
            tracing::debug!("PdhRemoveCounter returned {status:#X}");
        }
    }

    fn refresh(&self, session: &PdhSession) -> ProviderResult<()> {
        if !session.open {
            return Err(Report::new(ProviderError::SessionClosed));
        }
        // SAFETY: the query handle is open.
        let status = unsafe { PdhCollectQueryData(session.query) };
        match status {
            SUCCESS => Ok(()),
            INVALID_HANDLE => Err(Report::new(ProviderError::SessionClosed)),
            status => Err(Report::new(ProviderError::TransientSample { status })),
        }
    }

    fn read_value(&self, counter: &PdhCounter) -> ProviderResult<f64> {
        // SAFETY: PDH_FMT_COUNTERVALUE is plain data.
        let mut value: PDH_FMT_COUNTERVALUE = unsafe { mem::zeroed() };
        // SAFETY: `value` is a valid out pointer; the type out pointer is optional.
        let status = unsafe {
            PdhGetFormattedCounterValue(counter.handle, PDH_FMT_DOUBLE, ptr::null_mut(), &mut value)
        };
        let data_status = value.CStatus;

        if is_gone(status) || is_gone(data_status) {
            return Err(Report::new(ProviderError::StaleHandle));
        }
        if status != SUCCESS {
            return Err(Report::new(ProviderError::Call {
                call: "PdhGetFormattedCounterValue",
                status,
            }));
        }
        if data_status != VALID_DATA && data_status != NEW_DATA {
            return Err(Report::new(ProviderError::Call {
                call: "PdhGetFormattedCounterValue",
                status: data_status,
            }));
        }
        // SAFETY: PDH_FMT_DOUBLE selects the double member of the union.
        Ok(unsafe { value.Anonymous.doubleValue })
    }

    fn close_session(&self, session: &mut PdhSession) {
        if !mem::replace(&mut session.open, false) {
            return;
        }
        // SAFETY: the query is open and is closed exactly once.
        let status = unsafe { PdhCloseQuery(session.query) };
        if status != SUCCESS {
            tracing::warn!("PdhCloseQuery returned {status:#X}");
        }
    }

    fn counter_info(&self, counter: &PdhCounter, buffer: &mut [u8]) -> Probe {
        let mut size = buffer.len() as u32;
        let out = if buffer.is_empty() {
            ptr::null_mut()
        } else {
            buffer.as_mut_ptr().cast::<PDH_COUNTER_INFO_W>()
        };
        // SAFETY: `out` is null with a zero size, or points to `size` writable bytes.
        let status = unsafe { PdhGetCounterInfoW(counter.handle, 0, &mut size, out) };
        probe("PdhGetCounterInfoW", status, size, buffer.len())
    }

    fn info_full_path(&self, record: &[u8]) -> ProviderResult<String> {
        if record.len() < mem::size_of::<PDH_COUNTER_INFO_W>() {
            return Err(Report::new(ProviderError::Call {
                call: "PdhGetCounterInfoW",
                status: MORE_DATA,
            })
            .attach_printable(format!("counter info record is only {} bytes", record.len())));
        }
        // SAFETY: the record was filled by PdhGetCounterInfoW and is at least one struct long.
        let info: PDH_COUNTER_INFO_W = unsafe { ptr::read_unaligned(record.as_ptr().cast()) };
        // SAFETY: szFullPath points into `record`, which is still alive.
        unsafe { read_wide(info.szFullPath) }.ok_or_else(|| {
            Report::new(ProviderError::Call {
                call: "PdhGetCounterInfoW",
                status: SUCCESS,
            })
            .attach_printable("counter info record has no full path")
        })
    }

    fn expand_wildcard(&self, path: &str, buffer: &mut [u16]) -> Probe {
        let path_w = wide(path);
        let mut len = buffer.len() as u32;
        let out = if buffer.is_empty() {
            ptr::null_mut()
        } else {
            buffer.as_mut_ptr()
        };
        // SAFETY: `path_w` is NUL-terminated; `out` is null with a zero length, or
        // points to `len` writable UTF-16 units.
        let status = unsafe { PdhExpandWildCardPathW(ptr::null(), path_w.as_ptr(), out, &mut len, 0) };
        probe("PdhExpandWildCardPathW", status, len, buffer.len())
    }
}
