pub mod allocation_policy;
pub mod cloudlet;
pub mod cloudlet_scheduler;
pub mod cloudlet_schedulers;
pub mod common;
pub mod config;
pub mod error;
pub mod guest;
pub mod guest_host;
pub mod guest_registry;
pub mod guest_scheduler;
pub mod guest_schedulers;
pub mod host;
pub mod migration_policy;
pub mod pe;
pub mod provisioner;
pub mod res_cloudlet;
pub mod selection_policies;
pub mod selection_policy;
pub mod utilization_model;
