use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error};
use thiserror::Error;

use crate::outcome::ProbeOutcome;
use crate::probe::Probe;
use crate::result_map::ResultMap;

/// Number of certificates checked at the same time unless configured otherwise
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Error from [`BatchRunner`]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    /// Nothing could ever run with a concurrency of zero
    #[error("concurrency must be greater than zero")]
    ZeroConcurrency,
}

/// Checks domain names in consecutive groups
///
/// All probes of one group run at the same time. The next group starts only
/// after every probe of the current group has returned, so no more than
/// `concurrent` handshakes are ever in flight.
#[derive(Debug)]
pub struct BatchRunner<P> {
    probe: Arc<P>,
    concurrent: usize,
}

impl<P> BatchRunner<P>
where
    P: Probe + 'static,
{
    /// Create a runner with a probe and the size of each group
    ///
    /// ```
    /// use hce::{BatchError, BatchRunner, TlsProbe};
    /// assert!(BatchRunner::new(TlsProbe::default(), 10).is_ok());
    /// assert_eq!(
    ///     Some(BatchError::ZeroConcurrency),
    ///     BatchRunner::new(TlsProbe::default(), 0).err()
    /// );
    /// ```
    pub fn new(probe: P, concurrent: usize) -> Result<Self, BatchError> {
        if concurrent == 0 {
            return Err(BatchError::ZeroConcurrency);
        }
        Ok(BatchRunner {
            probe: Arc::new(probe),
            concurrent,
        })
    }

    /// Size of each group
    pub fn concurrent(&self) -> usize {
        self.concurrent
    }

    /// Check every domain name and collect one outcome per distinct name
    ///
    /// Duplicated names are probed independently, whichever finishes last wins.
    pub async fn run<T>(&self, domain_names: &[T]) -> BTreeMap<String, ProbeOutcome>
    where
        T: AsRef<str>,
    {
        let results = Arc::new(ResultMap::new());

        for (index, group) in domain_names.chunks(self.concurrent).enumerate() {
            let names: Vec<String> = group.iter().map(|d| d.as_ref().to_string()).collect();
            debug!("check group {index} {names:?}");

            let mut tasks = Vec::with_capacity(names.len());
            for domain_name in names.iter().cloned() {
                let probe = self.probe.clone();
                let results = results.clone();
                tasks.push(tokio::spawn(async move {
                    let outcome = probe.probe(&domain_name).await;
                    results.insert(domain_name, outcome);
                }));
            }

            // barrier: the whole group settles before the next one starts
            let joined = futures::future::join_all(tasks).await;
            for (domain_name, task) in names.into_iter().zip(joined) {
                if let Err(e) = task {
                    error!("probe task of {domain_name} failed: {e}");
                    let outcome = ProbeOutcome::failed(format!("probe task failed: {e}"));
                    results.insert(domain_name, outcome);
                }
            }
        }

        match Arc::try_unwrap(results) {
            Ok(results) => results.into_inner(),
            Err(results) => results.snapshot(),
        }
    }
}
