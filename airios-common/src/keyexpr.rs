//! Key expressions used by the bridge.
//!
//! States live under `<prefix>/<device>/<platform>/<key>`, commands under
//! the same key with a trailing `/set`, device info under `<prefix>/<device>/@/info`
//! and bridge status under `<prefix>/@/status`. Raw node commands, which have
//! no entity, go to `<prefix>/<device>/@/command`.

use crate::error::{Error, Result};
use crate::state::Platform;

pub const KEY_PREFIX: &str = "airios";

const SET_SUFFIX: &str = "set";
const NODE_COMMAND: &str = "@/command";

#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new(KEY_PREFIX)
    }
}

impl KeyExprBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// ```
    /// use airios_common::keyexpr::KeyExprBuilder;
    /// use airios_common::state::Platform;
    ///
    /// let keys = KeyExprBuilder::default();
    /// assert_eq!(
    ///     keys.state_key("0x01A2B3", Platform::Sensor, "co2_level"),
    ///     "airios/0x01A2B3/sensor/co2_level"
    /// );
    /// ```
    pub fn state_key(&self, device: &str, platform: Platform, key: &str) -> String {
        format!("{}/{}/{}/{}", self.prefix, device, platform.as_str(), key)
    }

    pub fn command_key(&self, device: &str, platform: Platform, key: &str) -> String {
        format!("{}/{}", self.state_key(device, platform, key), SET_SUFFIX)
    }

    /// Matches every command key under the prefix.
    pub fn command_wildcard(&self) -> String {
        format!("{}/*/*/*/{}", self.prefix, SET_SUFFIX)
    }

    pub fn device_wildcard(&self, device: &str) -> String {
        format!("{}/{}/**", self.prefix, device)
    }

    /// Device registry information of one node.
    pub fn device_info_key(&self, device: &str) -> String {
        format!("{}/{}/@/info", self.prefix, device)
    }

    pub fn node_command_key(&self, device: &str) -> String {
        format!("{}/{}/{}", self.prefix, device, NODE_COMMAND)
    }

    pub fn node_command_wildcard(&self) -> String {
        format!("{}/*/{}", self.prefix, NODE_COMMAND)
    }

    /// Device part of a node command key.
    pub fn node_command_device<'a>(&self, key_expr: &'a str) -> Option<&'a str> {
        let device = key_expr
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?
            .strip_suffix(NODE_COMMAND)?
            .strip_suffix('/')?;
        (!device.is_empty() && !device.contains('/') && device != "@").then_some(device)
    }

    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.prefix)
    }

    /// Parse a state or command key published under this prefix.
    pub fn parse(&self, key_expr: &str) -> Result<ParsedKeyExpr> {
        let rest = key_expr
            .strip_prefix(&self.prefix)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| Error::KeyExpr(format!("'{}' is not under '{}'", key_expr, self.prefix)))?;

        let parts: Vec<&str> = rest.split('/').collect();
        let (device, platform, key, command) = match parts.as_slice() {
            [device, platform, key] => (*device, *platform, *key, false),
            [device, platform, key, SET_SUFFIX] => (*device, *platform, *key, true),
            _ => {
                return Err(Error::KeyExpr(format!(
                    "'{}' does not match <device>/<platform>/<key>[/set]",
                    key_expr
                )));
            }
        };
        if device == "@" {
            return Err(Error::KeyExpr(format!("'{}' is a bridge key", key_expr)));
        }
        let platform = Platform::parse(platform)
            .ok_or_else(|| Error::KeyExpr(format!("unknown platform '{}'", platform)))?;

        Ok(ParsedKeyExpr {
            device: device.to_string(),
            platform,
            key: key.to_string(),
            command,
        })
    }
}

/// Components of an entity key expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyExpr {
    pub device: String,
    pub platform: Platform,
    pub key: String,
    /// True for `/set` keys.
    pub command: bool,
}
