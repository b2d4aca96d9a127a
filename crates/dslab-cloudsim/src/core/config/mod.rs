pub mod options;
pub mod sim_config;
