pub mod cycle_phase;
pub mod frame_result_set;
pub mod session_stats;
