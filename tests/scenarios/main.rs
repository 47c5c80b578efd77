//! Scenario tests: whole workflows run through the engine

mod helpers;

mod actions;
mod cancellation;
mod concurrency;
mod dependencies;
mod guards;
mod history;
mod matrix;
mod steps;
mod triggers;
