pub mod agents;
pub mod config;
pub mod dispatch;
pub mod run;
