//! Routing parameters.

/// What the routing pass is feeding; used for tracing and operation-side
/// decisions (a get-path collects digests, a put-path stores afterwards).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Bootstrap,
    Put,
    Get,
    Remove,
    Digest,
    Send,
}

/// Knobs of one iterative routing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Parallel in-flight NEIGHBORS queries.
    pub alpha: usize,
    /// Size of the closest set to converge on.
    pub k: usize,
    /// Failed RPCs tolerated before the pass gives up.
    pub max_failures: usize,
    /// Consecutive answers bringing no closer candidate before the pass
    /// settles; derived from `k` when unset.
    pub max_no_new_info: Option<usize>,
    pub operation: OperationKind,
}

impl RoutingConfig {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            alpha: 3,
            k: 20,
            max_failures: 3,
            max_no_new_info: None,
            operation,
        }
    }

    /// Small limits for tests.
    pub fn for_testing(operation: OperationKind) -> Self {
        Self {
            alpha: 2,
            k: 4,
            max_failures: 2,
            max_no_new_info: Some(3),
            operation,
        }
    }

    pub fn effective_no_new_info(&self) -> usize {
        self.max_no_new_info.unwrap_or((self.k / 4).max(2))
    }
}
