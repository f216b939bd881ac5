//! The _integrity audit_ library crate.
//!
//! A fleet of replicas of the same database registers itself in a shared
//! registry. In every persistence unit exactly one node at a time is
//! designated to audit the replicas against each other; designation
//! rotates between live nodes and moves away from nodes that stop
//! heartbeating.

pub mod audit;
pub mod commons;
pub mod config;
pub mod constants;
