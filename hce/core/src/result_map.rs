use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::outcome::ProbeOutcome;

/// Outcomes keyed by domain name, behind one lock
///
/// Every operation acquires the lock, touches the map and releases the lock
/// before returning. Readers must still wait until all writers are done
/// before they trust the contents to be complete.
#[derive(Debug, Default)]
pub struct ResultMap {
    inner: Mutex<BTreeMap<String, ProbeOutcome>>,
}

impl ResultMap {
    /// Create an empty map
    pub fn new() -> Self {
        ResultMap::default()
    }

    /// Insert or overwrite the outcome of a domain name
    ///
    /// ```
    /// use hce::{ProbeOutcome, ResultMap};
    /// let results = ResultMap::new();
    /// results.insert("example.com", ProbeOutcome::Days(1));
    /// results.insert("example.com", ProbeOutcome::Days(2));
    /// assert_eq!(Some(ProbeOutcome::Days(2)), results.get("example.com"));
    /// ```
    pub fn insert<T>(&self, domain_name: T, outcome: ProbeOutcome)
    where
        T: Into<String>,
    {
        let mut guard = self.lock();
        guard.insert(domain_name.into(), outcome);
    }

    /// Outcome of a domain name, `None` if nothing was written for it
    pub fn get(&self, domain_name: &str) -> Option<ProbeOutcome> {
        self.lock().get(domain_name).cloned()
    }

    /// Number of domain names written so far
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was written yet
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> BTreeMap<String, ProbeOutcome> {
        self.lock().clone()
    }

    /// Hand the contents over once every writer has finished
    pub fn into_inner(self) -> BTreeMap<String, ProbeOutcome> {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // a writer that panicked mid-insert still leaves a usable map
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ProbeOutcome>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
