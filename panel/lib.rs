#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod columns;
pub mod config;
pub mod data;
pub mod frame;
pub mod index;
pub mod lag;
pub mod pipeline;
pub mod report;
pub mod subset;

// Statistical core, kept in its own directory.
#[path = "../stats/lib.rs"]
pub mod stats;
