use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::endpoints::EndpointDescriptor;
use crate::record::Record;
use crate::store::RecordStore;

/// Result of running one input batch through the duplicate filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub records: Vec<Record>,
    pub duplicates: usize,
    /// True when existing keys could not be loaded and the input passed through unfiltered.
    pub degraded: bool,
}

/// Per-endpoint sets of unique keys known to exist, shared by every sync run.
///
/// Sets only grow between explicit clears. The store is asked for its current keys on
/// every run, so rows written by other processes are picked up too.
#[derive(Default)]
pub struct DuplicateFilter {
    known_keys: Mutex<HashMap<String, HashSet<String>>>,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn filter<S>(
        &self,
        store: &S,
        endpoint: &EndpointDescriptor,
        records: Vec<Record>,
    ) -> FilterOutcome
    where
        S: RecordStore + ?Sized,
    {
        let Some(unique_field) = endpoint.unique_field else {
            warn!(
                event = "dedup_skipped_no_unique_field",
                endpoint = endpoint.name,
                "endpoint declares no unique field; duplicate filtering skipped"
            );
            return FilterOutcome {
                records,
                duplicates: 0,
                degraded: false,
            };
        };

        let existing = match store.fetch_unique_keys(endpoint.table, unique_field).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(
                    event = "dedup_prefetch_failed",
                    endpoint = endpoint.name,
                    table = endpoint.table,
                    error = %err,
                    "could not load existing keys; passing records through unfiltered"
                );
                return FilterOutcome {
                    records,
                    duplicates: 0,
                    degraded: true,
                };
            }
        };

        let mut cache = self.known_keys.lock().await;
        let known = cache.entry(endpoint.name.to_string()).or_default();
        known.extend(existing);

        let input_len = records.len();
        let mut kept = Vec::with_capacity(input_len);
        let mut keyless = 0usize;
        for record in records {
            match record.key(unique_field) {
                Some(key) => {
                    if known.insert(key) {
                        kept.push(record);
                    }
                }
                None => {
                    keyless += 1;
                    kept.push(record);
                }
            }
        }

        if keyless > 0 {
            debug!(
                event = "dedup_keyless_records",
                endpoint = endpoint.name,
                unique_field,
                keyless,
                "records without a unique key bypass duplicate filtering"
            );
        }

        FilterOutcome {
            duplicates: input_len - kept.len(),
            records: kept,
            degraded: false,
        }
    }

    /// Clears one endpoint's set, or every set when `endpoint` is `None`.
    pub async fn clear(&self, endpoint: Option<&str>) {
        let mut cache = self.known_keys.lock().await;
        match endpoint {
            Some(name) => {
                cache.remove(name);
            }
            None => cache.clear(),
        }
    }

    /// Number of known keys per endpoint.
    pub async fn sizes(&self) -> BTreeMap<String, usize> {
        self.known_keys
            .lock()
            .await
            .iter()
            .map(|(name, keys)| (name.clone(), keys.len()))
            .collect()
    }
}
