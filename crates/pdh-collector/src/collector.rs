//! Thread-safe collector facade.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use error_stack::Report;

use crate::cycle;
use crate::cycle::Sample;
use crate::error::CollectResult;
use crate::error::CollectorError;
use crate::filter::CollectorConfig;
use crate::filter::InstanceFilter;
use crate::provider::CounterProvider;
use crate::registry::MetricRegistry;
use crate::session::CollectionSession;
use crate::session::ReresolveSummary;

/// Anything that can produce a batch of samples on demand.
///
/// The exporter depends on this rather than on a concrete provider.
pub trait SampleSource: Send + Sync {
    /// Runs one sampling cycle.
    fn collect(&self) -> CollectResult<Vec<Sample>>;

    /// Re-runs instance resolution without a sampling cycle.
    fn reresolve(&self) -> CollectResult<()>;

    /// Releases every provider resource. Later calls to [`Self::collect`]
    /// start over with a fresh session.
    fn shutdown(&self);
}

/// Owns one provider session and serializes every cycle on it.
pub struct Collector<P: CounterProvider> {
    provider: P,
    registry: MetricRegistry,
    filter: InstanceFilter,
    cycle_timeout: Duration,
    /// `None` after shutdown or after the session was lost.
    session: Mutex<Option<CollectionSession<P>>>,
}

impl<P: CounterProvider> Collector<P> {
    /// Builds the session and resolves every metric in `registry`.
    ///
    /// # Errors
    ///
    /// - [`CollectorError::InvalidConfig`] if a filter expression does not compile
    /// - [`CollectorError::ProviderUnavailable`] if no session can be opened
    /// - [`CollectorError::SessionClosed`] if the session dies while it is being built
    pub fn new(provider: P, registry: MetricRegistry, config: &CollectorConfig) -> CollectResult<Self> {
        let filter = InstanceFilter::from_config(config)?;
        let session = CollectionSession::build(&provider, &registry)?;

        Ok(Self {
            provider,
            registry,
            filter,
            cycle_timeout: config.cycle_timeout,
            session: Mutex::new(Some(session)),
        })
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs one cycle, first re-resolving if a handle went stale last time.
    ///
    /// If the session was lost, it is torn down and rebuilt right away so
    /// the next call can succeed.
    ///
    /// # Errors
    ///
    /// - [`CollectorError::TransientSample`] if this cycle could not sample
    /// - [`CollectorError::SessionClosed`] if the session was lost
    /// - [`CollectorError::ProviderUnavailable`] if no session could be reopened
    pub fn collect(&self) -> CollectResult<Vec<Sample>> {
        let mut guard = self.lock();
        if guard.is_none() {
            *guard = Some(CollectionSession::build(&self.provider, &self.registry)?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(Report::new(CollectorError::SessionClosed));
        };

        let result = if session.needs_reresolve() {
            session
                .reresolve(&self.provider, &self.registry)
                .and_then(|_| self.cycle(session))
        } else {
            self.cycle(session)
        };

        if let Err(report) = &result {
            if report.current_context() == &CollectorError::SessionClosed {
                self.rebuild(&mut guard);
            }
        }
        result
    }

    /// Re-runs instance resolution on the current session.
    ///
    /// # Errors
    ///
    /// - [`CollectorError::SessionClosed`] if the session was lost
    pub fn reresolve(&self) -> CollectResult<ReresolveSummary> {
        let mut guard = self.lock();
        let Some(session) = guard.as_mut() else {
            return Ok(ReresolveSummary::default());
        };

        let result = session.reresolve(&self.provider, &self.registry);
        if let Err(report) = &result {
            if report.current_context() == &CollectorError::SessionClosed {
                self.rebuild(&mut guard);
            }
        }
        result
    }

    /// Closes the session. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(mut session) = self.lock().take() {
            session.teardown(&self.provider);
        }
    }

    /// Labels currently resolved for each metric, in registration order.
    pub fn resolved_labels(&self) -> Vec<Vec<String>> {
        let guard = self.lock();
        self.registry
            .iter()
            .map(|(id, _)| {
                guard
                    .as_ref()
                    .map(|session| {
                        session
                            .instances(id)
                            .iter()
                            .map(|i| i.label().to_string())
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect()
    }

    fn cycle(&self, session: &mut CollectionSession<P>) -> CollectResult<Vec<Sample>> {
        cycle::run_cycle(
            &self.provider,
            session,
            &self.registry,
            &self.filter,
            self.cycle_timeout,
        )
    }

    fn rebuild(&self, slot: &mut Option<CollectionSession<P>>) {
        if let Some(mut dead) = slot.take() {
            dead.teardown(&self.provider);
        }
        tracing::warn!("counter session lost, rebuilding");
        match CollectionSession::build(&self.provider, &self.registry) {
            Ok(session) => *slot = Some(session),
            Err(report) => {
                tracing::error!("failed to rebuild counter session, will retry on next collect: {report:?}");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<CollectionSession<P>>> {
        // A panic mid-cycle leaves the handle table consistent enough to tear down.
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<P: CounterProvider> SampleSource for Collector<P> {
    fn collect(&self) -> CollectResult<Vec<Sample>> {
        Collector::collect(self)
    }

    fn reresolve(&self) -> CollectResult<()> {
        Collector::reresolve(self).map(|_| ())
    }

    fn shutdown(&self) {
        Collector::shutdown(self)
    }
}

impl<P: CounterProvider> Drop for Collector<P> {
    fn drop(&mut self) {
        let slot = self
            .session
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(mut session) = slot.take() {
            session.teardown(&self.provider);
        }
    }
}
