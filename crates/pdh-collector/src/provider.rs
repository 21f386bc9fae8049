//! Binding seam between the engine and the host counter subsystem.

use error_stack::Report;

use crate::error::ProviderError;
use crate::error::ProviderResult;

/// Outcome of one call of a two-phase (measure, then fill) provider query.
#[derive(Debug)]
pub enum Probe {
    /// The call succeeded and wrote `len` elements into the buffer.
    Filled(usize),
    /// The buffer was too small; `required` elements are needed.
    MoreData { required: usize },
    /// The call failed outright.
    Failed(Report<ProviderError>),
}

/// Access to a host performance counter facility.
///
/// Every call may block. A [`Self::Counter`] is only meaningful for the
/// session it was added to, and closing a session releases every counter
/// still registered on it.
pub trait CounterProvider: Send + Sync {
    /// One open sampling context.
    type Session: Send;
    /// One registered counter.
    type Counter: Send;

    /// Acquires a sampling context.
    fn open_session(&self) -> ProviderResult<Self::Session>;

    /// Registers a counter path, which may still contain a wildcard instance selector.
    fn add_counter(&self, session: &Self::Session, path: &str) -> ProviderResult<Self::Counter>;

    /// Unregisters a counter. Consuming the counter keeps the release single.
    fn remove_counter(&self, counter: Self::Counter);

    /// Takes one synchronized sample of every counter on the session.
    fn refresh(&self, session: &Self::Session) -> ProviderResult<()>;

    /// Returns the formatted value of the most recent sample.
    fn read_value(&self, counter: &Self::Counter) -> ProviderResult<f64>;

    /// Releases the session and its counters. Calling it twice is a no-op.
    fn close_session(&self, session: &mut Self::Session);

    /// Fills `buffer` with the provider's counter-information record.
    fn counter_info(&self, counter: &Self::Counter, buffer: &mut [u8]) -> Probe;

    /// Extracts the localized full counter path from a record filled by
    /// [`Self::counter_info`].
    fn info_full_path(&self, record: &[u8]) -> ProviderResult<String>;

    /// Fills `buffer` with the concrete paths matching a wildcard path, packed
    /// as NUL-terminated UTF-16 strings and closed by an empty string.
    fn expand_wildcard(&self, path: &str, buffer: &mut [u16]) -> Probe;
}

impl<T> CounterProvider for std::sync::Arc<T>
where T: CounterProvider
{
    type Session = T::Session;
    type Counter = T::Counter;

    fn open_session(&self) -> ProviderResult<Self::Session> {
        (**self).open_session()
    }

    fn add_counter(&self, session: &Self::Session, path: &str) -> ProviderResult<Self::Counter> {
        (**self).add_counter(session, path)
    }

    fn remove_counter(&self, counter: Self::Counter) {
        (**self).remove_counter(counter)
    }

    fn refresh(&self, session: &Self::Session) -> ProviderResult<()> {
        (**self).refresh(session)
    }

    fn read_value(&self, counter: &Self::Counter) -> ProviderResult<f64> {
        (**self).read_value(counter)
    }

    fn close_session(&self, session: &mut Self::Session) {
        (**self).close_session(session)
    }

    fn counter_info(&self, counter: &Self::Counter, buffer: &mut [u8]) -> Probe {
        (**self).counter_info(counter, buffer)
    }

    fn info_full_path(&self, record: &[u8]) -> ProviderResult<String> {
        (**self).info_full_path(record)
    }

    fn expand_wildcard(&self, path: &str, buffer: &mut [u16]) -> Probe {
        (**self).expand_wildcard(path, buffer)
    }
}
