// ==== Send side ====
/// Counter for events durably enqueued by the broker, labelled by status
pub const EVENTS_SENT_TOTAL: &str = "verifier_events_sent_total";

/// Histogram for the number of events in one batch send
pub const SEND_BATCH_SIZE: &str = "verifier_send_batch_size";

// ==== Receive side ====
/// Counter for events observed by the receive path, labelled by status
pub const EVENTS_RECEIVED_TOTAL: &str = "verifier_events_received_total";

/// Counter for events observed more than once in the same bucket
pub const DUPLICATE_DELIVERIES_TOTAL: &str = "verifier_duplicate_deliveries_total";

/// Gauge for receive loops currently draining a partition's handoff queue
pub const ACTIVE_RECEIVERS: &str = "verifier_active_receivers";

/// Counter for diagnostics recorded in the unexpected error list, labelled by kind
pub const UNEXPECTED_ERRORS_TOTAL: &str = "verifier_unexpected_errors_total";

// ==== Partition consumption ====
/// Gauge for partitions currently owned by this process
pub const ASSIGNED_PARTITIONS: &str = "verifier_assigned_partitions";

/// Counter for rebalance notifications, labelled by event type
pub const REBALANCE_EVENTS_TOTAL: &str = "verifier_rebalance_events_total";

/// Counter for batches that had to wait for room in a partition task's queue
pub const PARTITION_TASK_BACKPRESSURE_TOTAL: &str = "verifier_partition_task_backpressure_total";

/// Counter for failed offset commits
pub const OFFSET_COMMIT_ERRORS_TOTAL: &str = "verifier_offset_commit_errors_total";

/// Counter for fetched records whose partition is not owned by any task
pub const UNDELIVERABLE_RECORDS_TOTAL: &str = "verifier_undeliverable_records_total";

/// Counter for consumer poll errors, labelled by level
pub const CONSUMER_POLL_ERRORS_TOTAL: &str = "verifier_consumer_poll_errors_total";

/// Histogram for records fetched in one poll round
pub const POLL_ROUND_RECORDS: &str = "verifier_poll_round_records";
