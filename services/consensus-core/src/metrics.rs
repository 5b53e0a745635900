use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;
use crate::message::Command;

static CONSENSUS_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("consensus-core"));

/// Counters recorded against the global meter. They are no-ops unless the host installs a
/// meter provider.
#[derive(Clone)]
pub struct ConsensusMetrics {
    messages_total: Counter<u64>,
    rejected_total: Counter<u64>,
    pre_prepares_total: Counter<u64>,
    commits_broadcast_total: Counter<u64>,
    committed_total: Counter<u64>,
}

impl ConsensusMetrics {
    pub fn new() -> Self {
        Self {
            messages_total: CONSENSUS_METER.u64_counter("pbft_messages_total").with_description("Inbound PBFT frames").init(),
            rejected_total: CONSENSUS_METER.u64_counter("pbft_rejected_total").with_description("Frames dropped (undecodable / failed validation)").init(),
            pre_prepares_total: CONSENSUS_METER.u64_counter("pbft_pre_prepares_total").with_description("Pre-prepares issued or accepted").init(),
            commits_broadcast_total: CONSENSUS_METER.u64_counter("pbft_commits_broadcast_total").with_description("Commit broadcasts after a prepare quorum").init(),
            committed_total: CONSENSUS_METER.u64_counter("pbft_committed_total").with_description("Requests appended to the local ledger").init(),
        }
    }

    pub fn message(&self, command: Option<Command>) {
        self.messages_total.add(1, &[KeyValue::new("command", command.map(|c| c.tag()).unwrap_or("UNKNOWN"))]);
    }

    pub fn rejected(&self, command: Option<Command>) {
        self.rejected_total.add(1, &[KeyValue::new("command", command.map(|c| c.tag()).unwrap_or("UNKNOWN"))]);
    }

    pub fn pre_prepared(&self) { self.pre_prepares_total.add(1, &[]); }

    pub fn commit_broadcast(&self) { self.commits_broadcast_total.add(1, &[]); }

    pub fn committed(&self) { self.committed_total.add(1, &[]); }
}

impl Default for ConsensusMetrics {
    fn default() -> Self { Self::new() }
}
