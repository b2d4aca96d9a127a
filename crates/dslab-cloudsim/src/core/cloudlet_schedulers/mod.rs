pub mod dynamic_workload;
pub mod space_shared;
pub mod time_shared;
