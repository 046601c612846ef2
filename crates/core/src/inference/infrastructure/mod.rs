pub mod permit_pool;
pub mod result_snapshot;
pub mod worker_pool;
