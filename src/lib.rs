//! Priority-aware dispatcher and supervised worker pools fronting
//! single-threaded model-serving subprocesses behind one HTTP endpoint.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod manager;
pub mod models;
pub mod queue;
pub mod supervisor;
pub mod telemetry;
pub mod worker;
