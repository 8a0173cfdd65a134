use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// Translate our settings into a zenoh configuration.
pub fn zenoh_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    if !matches!(config.mode.as_str(), "client" | "peer" | "router") {
        return Err(Error::config(format!(
            "invalid zenoh mode '{}', expected client, peer or router",
            config.mode
        )));
    }

    let mut zenoh_config = zenoh::Config::default();
    zenoh_config
        .insert_json5("mode", &format!("\"{}\"", config.mode))
        .map_err(|e| Error::config(format!("zenoh mode: {}", e)))?;

    for (path, endpoints) in [
        ("connect/endpoints", &config.connect),
        ("listen/endpoints", &config.listen),
    ] {
        if endpoints.is_empty() {
            continue;
        }
        let json = serde_json::to_string(endpoints)?;
        zenoh_config
            .insert_json5(path, &json)
            .map_err(|e| Error::config(format!("zenoh {}: {}", path, e)))?;
    }

    Ok(zenoh_config)
}

/// Open a zenoh session.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let zenoh_config = zenoh_config(config)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );
    let session = zenoh::open(zenoh_config).await?;
    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}
