//! Scoped change subscription.
//!
//! A `Subscription` owns one remote filter plus the version token of the
//! last batch it received. Dropping it destroys the filter, so every exit
//! path of a wait loop (return, `?`, panic unwinding) releases the remote
//! resource.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::connection::{FilterId, FilterSpec, SubscriptionService, UpdateBatch, Version};
use crate::error::ConnectionError;

/// An active property filter and its version cursor.
pub struct Subscription<'s, S: SubscriptionService + ?Sized> {
    service: &'s S,
    filter: FilterId,
    version: Option<Version>,
    released: AtomicBool,
}

impl<'s, S: SubscriptionService + ?Sized> Subscription<'s, S> {
    /// Create the remote filter.
    pub fn create(service: &'s S, spec: &FilterSpec) -> Result<Self, ConnectionError> {
        let filter = service.create_filter(spec)?;
        debug!(task = %spec.task, filter = %filter, paths = ?spec.paths, "subscription created");
        Ok(Self {
            service,
            filter,
            version: None,
            released: AtomicBool::new(false),
        })
    }

    /// The remote filter backing this subscription.
    #[must_use]
    pub const fn filter_id(&self) -> FilterId {
        self.filter
    }

    /// Version of the last batch received, `None` before the first one.
    #[must_use]
    pub const fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// True once the filter has been destroyed.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Block for the next batch and advance the version cursor.
    ///
    /// Returns `Ok(None)` when `max_wait` elapsed without changes.
    pub fn next_batch(&mut self, max_wait: Option<Duration>) -> Result<Option<UpdateBatch>, ConnectionError> {
        if self.is_released() {
            return Err(ConnectionError::UnknownFilter(self.filter));
        }
        let batch = self.service.wait_for_updates(self.version.as_ref(), max_wait)?;
        if let Some(batch) = &batch {
            self.version = Some(batch.version.clone());
        }
        Ok(batch)
    }

    /// Destroy the remote filter.
    ///
    /// Idempotent: only the first call reaches the service.
    pub fn release(&self) -> Result<(), ConnectionError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(filter = %self.filter, "subscription released");
        self.service.destroy_filter(self.filter)
    }
}

impl<S: SubscriptionService + ?Sized> Drop for Subscription<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            // Never mask the error that caused the unwind.
            warn!(filter = %self.filter, error = %err, "failed to release subscription");
        }
    }
}

impl<S: SubscriptionService + ?Sized> std::fmt::Debug for Subscription<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("version", &self.version)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;
    use crate::task::TaskId;

    #[derive(Default)]
    struct CountingService {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        calls: Mutex<Vec<Option<Version>>>,
    }

    impl SubscriptionService for CountingService {
        fn create_filter(&self, _spec: &FilterSpec) -> Result<FilterId, ConnectionError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(FilterId::new())
        }

        fn wait_for_updates(
            &self,
            since: Option<&Version>,
            _max_wait: Option<Duration>,
        ) -> Result<Option<UpdateBatch>, ConnectionError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(since.cloned());
            Ok(Some(UpdateBatch {
                version: Version::new(calls.len().to_string()),
                changes: Vec::new(),
            }))
        }

        fn destroy_filter(&self, _filter: FilterId) -> Result<(), ConnectionError> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn release_is_idempotent_and_drop_does_not_double_destroy() {
        let service = CountingService::default();
        let sub = Subscription::create(&service, &FilterSpec::all_properties(TaskId::new())).unwrap();
        sub.release().unwrap();
        sub.release().unwrap();
        drop(sub);
        assert_eq!(service.created.load(Ordering::SeqCst), 1);
        assert_eq!(service.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_unreleased_subscription() {
        let service = CountingService::default();
        {
            let _sub = Subscription::create(&service, &FilterSpec::all_properties(TaskId::new())).unwrap();
        }
        assert_eq!(service.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn next_batch_advances_version_cursor() {
        let service = CountingService::default();
        let mut sub = Subscription::create(&service, &FilterSpec::all_properties(TaskId::new())).unwrap();
        assert!(sub.version().is_none());
        sub.next_batch(None).unwrap();
        sub.next_batch(None).unwrap();
        assert_eq!(sub.version(), Some(&Version::new("2")));

        let calls = service.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![None, Some(Version::new("1"))]);
    }

    #[test]
    fn next_batch_after_release_is_rejected() {
        let service = CountingService::default();
        let mut sub = Subscription::create(&service, &FilterSpec::all_properties(TaskId::new())).unwrap();
        sub.release().unwrap();
        let err = sub.next_batch(None).unwrap_err();
        assert_eq!(err, ConnectionError::UnknownFilter(sub.filter_id()));
    }
}
