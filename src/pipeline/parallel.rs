//! Concurrent execution of independent stages.

use super::stage::Stage;
use std::sync::Arc;

/// What happens to running members when the run is cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Let running members finish; members not yet started are skipped.
    #[default]
    Drain,
    /// Abandon running members at their next await point.
    Interrupt,
}

/// A set of independent stages run concurrently and joined before the run
/// proceeds.
///
/// Members must not read each other's outputs. Their updates are merged in
/// the order they were added, whatever order they finish in.
#[derive(Clone)]
pub struct ParallelGroup {
    name: String,
    members: Vec<Arc<dyn Stage>>,
    max_concurrency: usize,
    cancel_policy: CancelPolicy,
    announce_starts: bool,
}

impl std::fmt::Debug for ParallelGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelGroup")
            .field("name", &self.name)
            .field("members", &self.member_names())
            .field("max_concurrency", &self.max_concurrency)
            .field("cancel_policy", &self.cancel_policy)
            .field("announce_starts", &self.announce_starts)
            .finish()
    }
}

impl ParallelGroup {
    /// An empty group with unbounded concurrency.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Vec::new(),
            max_concurrency: usize::MAX,
            cancel_policy: CancelPolicy::default(),
            announce_starts: false,
        }
    }

    pub fn with_member(mut self, stage: Arc<dyn Stage>) -> Self {
        self.members.push(stage);
        self
    }

    pub fn with_members(mut self, stages: impl IntoIterator<Item = Arc<dyn Stage>>) -> Self {
        self.members.extend(stages);
        self
    }

    /// Limit how many members run at once. Values below 1 are treated as 1.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.cancel_policy = policy;
        self
    }

    /// Emit `<member>.start` when each member acquires its slot.
    pub fn with_start_events(mut self) -> Self {
        self.announce_starts = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Arc<dyn Stage>] {
        &self.members
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn cancel_policy(&self) -> CancelPolicy {
        self.cancel_policy
    }

    pub fn announces_starts(&self) -> bool {
        self.announce_starts
    }

    /// Every field written by any member, in declared order.
    pub fn outputs(&self) -> Vec<String> {
        self.members.iter().flat_map(|m| m.outputs()).collect()
    }
}
