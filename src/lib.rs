pub mod aggregate;
pub mod chain;
pub mod collective;
pub mod core;
pub mod distributions;
pub mod io;
pub mod metropolis;
pub mod report;
pub mod run;
pub mod stats;
pub mod warmup;
