//! Release action counters

use opentelemetry::{
    global,
    metrics::{Counter, Meter},
};

/// Sink for release action counters, injected into the pipeline.
pub trait MetricsSink: Send + Sync {
    fn tag(&self);
    fn release(&self);
    fn pre_release(&self);
    fn gitops(&self);
}

/// Discards every counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn tag(&self) {}
    fn release(&self) {}
    fn pre_release(&self) {}
    fn gitops(&self) {}
}

/// OpenTelemetry counters for release actions
#[derive(Debug, Clone)]
pub struct ReleaseMetrics {
    /// Tags pushed to a remote
    pub tag_total: Counter<u64>,
    /// Provider releases created or promoted from a draft
    pub release_total: Counter<u64>,
    /// Provider pre-releases created or promoted from a draft
    pub pre_release_total: Counter<u64>,
    /// GitOps write-backs completed
    pub gitops_total: Counter<u64>,
}

impl ReleaseMetrics {
    /// Build the counters on `meter`.
    pub fn new(meter: &Meter) -> Self {
        let tag_total = meter
            .u64_counter("releaser_tag_total")
            .with_description("Number of tags pushed")
            .build();

        let release_total = meter
            .u64_counter("releaser_release_total")
            .with_description("Number of provider releases published")
            .build();

        let pre_release_total = meter
            .u64_counter("releaser_prerelease_total")
            .with_description("Number of provider pre-releases published")
            .build();

        let gitops_total = meter
            .u64_counter("releaser_gitops_total")
            .with_description("Number of GitOps repository write-backs")
            .build();

        Self {
            tag_total,
            release_total,
            pre_release_total,
            gitops_total,
        }
    }

    /// Counters on the globally installed meter provider.
    pub fn from_global() -> Self {
        Self::new(&global::meter("releaser"))
    }
}

impl MetricsSink for ReleaseMetrics {
    fn tag(&self) {
        self.tag_total.add(1, &[]);
    }

    fn release(&self) {
        self.release_total.add(1, &[]);
    }

    fn pre_release(&self) {
        self.pre_release_total.add(1, &[]);
    }

    fn gitops(&self) {
        self.gitops_total.add(1, &[]);
    }
}
