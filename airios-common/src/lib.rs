//! Airios bridge common library
//!
//! Shared pieces of the Airios zenoh bridge:
//!
//! - [`state`] - entity state payloads (`EntityState`, `StateValue`, `Platform`)
//! - [`serialization`] - JSON/CBOR encoding
//! - [`config`] - JSON5 configuration loading
//! - [`session`] - zenoh session setup
//! - [`keyexpr`] - key expression builder and parser
//! - [`error`] - error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod serialization;
pub mod session;
pub mod state;

pub use config::{BaseConfig, LogFormat, LoggingConfig, ZenohConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use keyexpr::{KEY_PREFIX, KeyExprBuilder, ParsedKeyExpr};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use state::{
    BridgeState, BridgeStatus, DeviceInfo, EntityState, Platform, StateValue,
    current_timestamp_millis,
};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Fails if a subscriber
/// is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    installed.map_err(|e| Error::config(format!("cannot initialize tracing: {}", e)))
}
