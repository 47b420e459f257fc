//! Support code for the `dw` command-line tool

pub mod config;
pub mod filter;
pub mod logging;
pub mod output;
