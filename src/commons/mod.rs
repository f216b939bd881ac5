//! Common types used by the various integrity audit components.

pub mod clock;
pub mod storage;
