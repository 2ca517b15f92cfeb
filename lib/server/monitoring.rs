use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Registers immutable build metadata for `/metrics` scraping.
///
/// Encoded as a labeled gauge with value `1` so the build labels survive Prometheus
/// text exposition.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "legislative_sync",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone)]
pub struct SyncMetrics {
    /// Records written or confirmed present, including resolved conflicts.
    pub records_persisted_total: Counter,
    pub duplicates_filtered_total: Counter,
    /// Records that could not be written after retries and escalation.
    pub record_failures_total: Counter,
    pub conflicts_resolved_total: Counter,
    pub batch_retries_total: Counter,
    /// Sub-batches that fell back to per-record writes.
    pub escalations_total: Counter,
    pub runs_total: Counter,
}

impl SyncMetrics {
    fn init() -> Self {
        Self {
            records_persisted_total: Counter::default(),
            duplicates_filtered_total: Counter::default(),
            record_failures_total: Counter::default(),
            conflicts_resolved_total: Counter::default(),
            batch_retries_total: Counter::default(),
            escalations_total: Counter::default(),
            runs_total: Counter::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "records_persisted",
            "Total number of records persisted by sync runs",
            metrics.records_persisted_total.clone(),
        );
        sub_registry.register(
            "duplicates_filtered",
            "Total number of input records dropped as already known",
            metrics.duplicates_filtered_total.clone(),
        );
        sub_registry.register(
            "record_failures",
            "Total number of records that failed to persist",
            metrics.record_failures_total.clone(),
        );
        sub_registry.register(
            "conflicts_resolved",
            "Total number of per-record conflicts treated as already persisted",
            metrics.conflicts_resolved_total.clone(),
        );
        sub_registry.register(
            "batch_retries",
            "Total number of sub-batch retry attempts",
            metrics.batch_retries_total.clone(),
        );
        sub_registry.register(
            "escalations",
            "Total number of sub-batches escalated to per-record writes",
            metrics.escalations_total.clone(),
        );
        sub_registry.register(
            "runs",
            "Total number of completed endpoint sync runs",
            metrics.runs_total.clone(),
        );
        metrics
    }
}

pub static SYNC_METRICS: OnceCell<SyncMetrics> = OnceCell::const_new();
