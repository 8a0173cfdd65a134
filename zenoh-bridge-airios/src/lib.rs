//! Zenoh bridge for Airios RF ventilation bridges.
//!
//! The bridge polls every node bound to an Airios RF bridge and publishes
//! the projected entity states to Zenoh. Entity writes arrive on `/set`
//! keys and are routed to the node as commands.
//!
//! # Key Expressions
//!
//! ```text
//! airios/<device>/<platform>/<key>        entity state
//! airios/<device>/<platform>/<key>/set    entity command
//! airios/<device>/@/info                  device info
//! airios/@/status                         bridge status
//! ```
//!
//! Where:
//! - `<device>` - RF address of the node, e.g. `0xA1B2C3`
//! - `<platform>` - `fan`, `sensor`, `binary_sensor`, `select`, `number`,
//!   `switch` or `button`
//! - `<key>` - entity key, e.g. `indoor_air_temperature`

pub mod commands;
pub mod config;
pub mod error;
pub mod publisher;
pub mod simulator;
