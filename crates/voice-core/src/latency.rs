//! Latency aggregation across stacked layers
//!
//! A layer's latency is its master's latency plus whatever the layer buffers
//! itself, converted to time with the layer's own sample spec. A master that
//! cannot answer contributes zero: the query still succeeds with the local
//! part only.

use crate::dispatch::{IoContext, IoCore, Op};
use crate::types::SampleSpec;

/// Latency of one layer, split into its parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyReport {
    /// Master's total latency; `None` if there is no master or it failed
    pub master_usec: Option<u64>,
    /// Duration of the data queued in this layer
    pub buffered_usec: u64,
}

impl LatencyReport {
    pub fn total_usec(&self) -> u64 {
        self.master_usec.unwrap_or(0).saturating_add(self.buffered_usec)
    }
}

/// Duration of `queued_bytes` in `spec`
#[inline]
pub fn buffered_duration(queued_bytes: usize, spec: &SampleSpec) -> u64 {
    spec.bytes_to_usec(queued_bytes)
}

/// Ask the master, then add this layer's own buffering
pub fn aggregate(ctx: &mut IoContext<'_>, core: &IoCore, queued_bytes: usize) -> LatencyReport {
    let master_usec = core.master.and_then(|master| {
        let usec = ctx.query_latency(master.id);
        if usec.is_none() {
            log::debug!(
                "[LATENCY] {}: master {} did not answer, reporting local buffering only",
                core.name,
                master.id
            );
        }
        usec
    });

    LatencyReport {
        master_usec,
        buffered_usec: buffered_duration(queued_bytes, &core.spec),
    }
}

/// Forward the effective requested latency one layer down
pub fn propagate_requested(core: &IoCore, ctx: &mut IoContext<'_>) {
    let Some(master) = core.master else {
        return;
    };
    if !ctx.is_attached(master.id) {
        log::debug!("[LATENCY] {}: master detached, request not forwarded", core.name);
        return;
    }
    ctx.post(master.id, Op::UpdateRequestedLatency(core.effective_requested_latency()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleFormat;

    #[test]
    fn test_buffered_duration() {
        // 8 kHz mono s16: 16 bytes per ms
        let voice = SampleSpec::voice_narrowband();
        assert_eq!(buffered_duration(1600, &voice), 100_000);
        // 48 kHz stereo s16: 192 bytes per ms
        let hw = SampleSpec::hw_default();
        assert_eq!(buffered_duration(1920, &hw), 10_000);
        assert_eq!(buffered_duration(0, &hw), 0);
    }

    #[test]
    fn test_partial_frames_ignored() {
        let spec = SampleSpec::new(SampleFormat::S16Le, 1000, 2);
        assert_eq!(buffered_duration(3, &spec), 0);
        assert_eq!(buffered_duration(4, &spec), 1000);
    }

    #[test]
    fn test_failed_master_counts_as_zero() {
        let report = LatencyReport {
            master_usec: None,
            buffered_usec: 40_000,
        };
        assert_eq!(report.total_usec(), 40_000);

        let report = LatencyReport {
            master_usec: Some(5_000),
            buffered_usec: 40_000,
        };
        assert_eq!(report.total_usec(), 45_000);
    }
}
