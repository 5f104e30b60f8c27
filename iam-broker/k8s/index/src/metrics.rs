use crate::{namespace, workload};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{counter::Counter, gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct WorkloadIndexMetrics {
    pub(crate) applies: Counter,
    pub(crate) deletes: Counter,
    pub(crate) resets: Counter,
    pub(crate) announcements_dropped: Counter,
}

#[derive(Debug)]
struct Instrumented {
    workloads: workload::SharedIndex,
    namespaces: namespace::SharedIndex,
}

impl WorkloadIndexMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let applies = Counter::default();
        reg.register(
            "applies",
            "Count of pod updates applied to the index",
            applies.clone(),
        );

        let deletes = Counter::default();
        reg.register(
            "deletes",
            "Count of pod deletions applied to the index",
            deletes.clone(),
        );

        let resets = Counter::default();
        reg.register(
            "resets",
            "Count of full pod resyncs applied to the index",
            resets.clone(),
        );

        let announcements_dropped = Counter::default();
        reg.register(
            "announcements_dropped",
            "Count of pod announcements dropped because the prefetch buffer was full",
            announcements_dropped.clone(),
        );

        Self {
            applies,
            deletes,
            resets,
            announcements_dropped,
        }
    }

    pub fn announcements_dropped(&self) -> u64 {
        self.announcements_dropped.get()
    }
}

/// Registers gauges reporting the size of the pod and namespace indexes.
pub fn register_sizes(
    reg: &mut Registry,
    workloads: workload::SharedIndex,
    namespaces: namespace::SharedIndex,
) {
    reg.register_collector(Box::new(Instrumented {
        workloads,
        namespaces,
    }));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let workloads = self.workloads.read();
        let mut pods_encoder = encoder.encode_descriptor(
            "workload_index_size",
            "The number of pods in the index",
            None,
            MetricType::Gauge,
        )?;
        for (ns, size) in workloads.namespace_sizes() {
            let labels = [("namespace", ns)];
            let pods = ConstGauge::new(size as u32);
            let pods_encoder = pods_encoder.encode_family(&labels)?;
            pods.encode(pods_encoder)?;
        }
        drop(workloads);

        let namespaces_encoder = encoder.encode_descriptor(
            "namespace_index_size",
            "The number of namespaces in the index",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(self.namespaces.read().len() as u32).encode(namespaces_encoder)?;

        Ok(())
    }
}
