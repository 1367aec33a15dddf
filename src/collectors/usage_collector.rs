use crate::collectors::probe::UsageProbe;
use crate::config::PathSet;
use crate::error::ConfigError;
use crate::snapshot::UsageSnapshot;
use chrono::Utc;
use log::{debug, error, warn};
use prometheus::core::{Collector, Desc, Describer};
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::Opts;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const FOLDER_SUBSYSTEM: &str = "folder";
const SIZE_BYTES: &str = "size_bytes";
const NAME_LABEL: &str = "name";

/// Prometheus collector exporting `du` sizes for a set of paths
///
/// Every scrape runs the probe once per configured path and publishes one
/// gauge sample per reported entry, labelled `name`. The values are the
/// kilobyte counts printed by `du -k` even though the metric name ends in
/// `_bytes`; the name is kept for compatibility with existing dashboards.
///
/// A single lock serializes scrapes: a concurrent scrape waits for the one in
/// flight and then takes its own measurement.
pub struct UsageCollector {
    paths: PathSet,
    probe: Arc<dyn UsageProbe>,
    desc: Desc,
    scrape_lock: Mutex<()>,
}

impl UsageCollector {
    /// Create a collector for `paths`, naming the metric
    /// `<namespace>_folder_size_bytes`
    ///
    /// # Arguments
    ///
    /// * `namespace` - Metric name prefix, such as `file_size`
    /// * `paths` - Paths measured on every scrape, in order
    /// * `probe` - Source of the raw `du` output
    ///
    /// # Returns
    ///
    /// A collector ready to be registered with a `prometheus::Registry`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the namespace does not form a
    /// valid metric name.
    pub fn new(
        namespace: &str,
        paths: PathSet,
        probe: Arc<dyn UsageProbe>,
    ) -> Result<Self, ConfigError> {
        let desc = Opts::new(SIZE_BYTES, "folder size in bytes.")
            .namespace(namespace)
            .subsystem(FOLDER_SUBSYSTEM)
            .variable_labels(vec![NAME_LABEL.to_string()])
            .describe()
            .map_err(|e| ConfigError::ValidationError(format!("metric descriptor: {}", e)))?;

        Ok(Self {
            paths,
            probe,
            desc,
            scrape_lock: Mutex::new(()),
        })
    }

    /// The single descriptor this collector emits
    pub fn describe(&self) -> &Desc {
        &self.desc
    }

    /// Paths measured on every scrape
    pub fn paths(&self) -> &PathSet {
        &self.paths
    }

    /// Measure every configured path and return the merged snapshot
    ///
    /// Paths are measured in order. A later path's entry replaces an earlier
    /// one with the same name. If a measurement fails, the remaining paths
    /// are skipped and the entries gathered so far are returned.
    pub fn collect_snapshot(&self) -> UsageSnapshot {
        let _guard = self.lock();
        self.measure_all()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded data is (), so a panic in another scrape leaves nothing inconsistent
        self.scrape_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Must be called with `scrape_lock` held
    fn measure_all(&self) -> UsageSnapshot {
        let mut snapshot = UsageSnapshot::new();
        let mut origin: HashMap<String, &str> = HashMap::new();

        for path in self.paths.iter() {
            let output = match self.probe.measure(path) {
                Ok(output) => output,
                Err(e) => {
                    error!("Measuring {} failed, skipping remaining paths: {}", path, e);
                    return snapshot;
                }
            };

            let measured = UsageSnapshot::from_du_output(&output);
            debug!("Measured {}: {} entries", path, measured.len());

            for (name, kilobytes) in measured {
                if let Some(previous) = origin.insert(name.clone(), path) {
                    if previous != path {
                        warn!(
                            "Entry {:?} from {} replaces the one reported for {}",
                            name, path, previous
                        );
                    }
                }
                snapshot.insert(name, kilobytes);
            }
        }

        snapshot
    }

    fn render(&self, snapshot: UsageSnapshot) -> Vec<MetricFamily> {
        if snapshot.is_empty() {
            return Vec::new();
        }

        let timestamp_ms = Utc::now().timestamp_millis();
        let metrics: Vec<Metric> = snapshot
            .into_iter()
            .map(|(name, kilobytes)| {
                let mut label = LabelPair::default();
                label.set_name(NAME_LABEL.to_string());
                label.set_value(name);

                let mut gauge = Gauge::default();
                gauge.set_value(kilobytes as f64);

                let mut metric = Metric::default();
                metric.set_label(vec![label].into());
                metric.set_gauge(gauge);
                metric.set_timestamp_ms(timestamp_ms);
                metric
            })
            .collect();

        let mut family = MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(MetricType::GAUGE);
        family.set_metric(metrics.into());
        vec![family]
    }
}

impl Collector for UsageCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        // Held through measurement and rendering
        let _guard = self.lock();
        let snapshot = self.measure_all();
        self.render(snapshot)
    }
}
