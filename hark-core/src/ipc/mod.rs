//! Serializable types a kiosk front end consumes.
//!
//! Everything here derives `serde::Serialize` + `serde::Deserialize` and is
//! published over tokio `broadcast` channels by the engine.

pub mod events;
