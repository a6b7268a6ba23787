#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod orders;
pub mod sweeper;

pub use config::Config;
