pub mod first_fit;
pub mod least_full;
pub mod maximum_correlation;
pub mod maximum_usage;
pub mod minimum_migration_time;
pub mod most_full;
pub mod random;
pub mod worst_fit;
