//! Metric name and label definitions.
//!
//! Centralizing these keeps names consistent between the router and the
//! store backends.

/// Message routing metrics
pub mod router {
    /// Inbound activities handled, labelled by sender role and route taken
    pub const MESSAGES_TOTAL: &str = "handoff_router_messages_total";
    /// Time spent in `HandoffRouter::handle`, in seconds
    pub const HANDLE_DURATION_SECONDS: &str = "handoff_router_handle_duration_seconds";
    /// Messages forwarded between a user and an agent
    pub const FORWARDS_TOTAL: &str = "handoff_router_forwards_total";
    /// Forwards that failed or timed out
    pub const FORWARD_ERRORS_TOTAL: &str = "handoff_router_forward_errors_total";
    /// Messages dropped with a failure notice because the store failed
    pub const STORE_FAILURES_TOTAL: &str = "handoff_router_store_failures_total";
}

/// Queue and pairing metrics
pub mod queue {
    /// Users placed in the waiting queue
    pub const ENQUEUED_TOTAL: &str = "handoff_queue_enqueued_total";
    /// Users who left the queue via "cancel"
    pub const CANCELLED_TOTAL: &str = "handoff_queue_cancelled_total";
    /// Successful agent pairings
    pub const CONNECTS_TOTAL: &str = "handoff_queue_connects_total";
    /// "#connect" attempts against an empty queue
    pub const EMPTY_CONNECTS_TOTAL: &str = "handoff_queue_empty_connects_total";
    /// Pairings ended by "#disconnect"
    pub const DISCONNECTS_TOTAL: &str = "handoff_queue_disconnects_total";
    /// Seconds a user waited between enqueue and pairing
    pub const WAIT_SECONDS: &str = "handoff_queue_wait_seconds";
}

/// Store backend metrics
pub mod store {
    /// Records created by `find_or_create`
    pub const RECORDS_CREATED_TOTAL: &str = "handoff_store_records_created_total";
    /// Store operation duration by operation type
    pub const OPERATION_DURATION_SECONDS: &str = "handoff_store_operation_duration_seconds";
}

/// Common label keys used across metrics
pub mod labels {
    pub const ROLE: &str = "role";
    pub const ROUTE: &str = "route";
    pub const BACKEND: &str = "backend";
    pub const OPERATION: &str = "operation";
    pub const DIRECTION: &str = "direction";
}
