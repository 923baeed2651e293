pub mod domain;
pub mod workload;
