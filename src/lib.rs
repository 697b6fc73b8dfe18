pub mod configuration;
pub mod controller;
pub mod device;
pub mod error_handling;
pub mod execution;
pub mod scheduler;
pub mod session_management;
pub mod storage;
pub mod web_interface;
