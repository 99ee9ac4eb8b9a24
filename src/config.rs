//! Process configuration
//!
//! The resource manager is configured through the environment, the same way smithay
//! lets `SMITHAY_USE_LEGACY` force the legacy drm code path:
//!
//! - `SMITHAY_SCANOUT_DEVICE` - path of the drm node to open. A trailing `%` is replaced by
//!   `0`, `1`, `2`, ... and every existing kms node is opened. Defaults to `/dev/dri/card%`.
//! - `SMITHAY_SCANOUT_PRIMARY_DISPLAY_ORDER` - comma separated list of connector names
//!   (e.g. `eDP-1,HDMI-A-1`) to pick the primary display from. A trailing `...` allows any
//!   internal connector to be picked if none of the listed ones is connected. Defaults to `...`.
//! - `SMITHAY_SCANOUT_SCALE_WITH_GPU` - force scaling to be done by client composition.

use std::path::PathBuf;

/// Default device path pattern
pub const DEFAULT_DEVICE_PATTERN: &str = "/dev/dri/card%";

/// Wildcard entry of a display order, see [`DisplayOrder`]
pub const DISPLAY_ORDER_WILDCARD: &str = "...";

const DEVICE_VAR: &str = "SMITHAY_SCANOUT_DEVICE";
const DISPLAY_ORDER_VAR: &str = "SMITHAY_SCANOUT_PRIMARY_DISPLAY_ORDER";
const SCALE_WITH_GPU_VAR: &str = "SMITHAY_SCANOUT_SCALE_WITH_GPU";

/// Ordered connector names considered for the primary display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayOrder {
    names: Vec<String>,
}

impl DisplayOrder {
    /// Parse a comma separated list of connector names
    ///
    /// Entries are trimmed, an empty input results in an order with a single empty entry,
    /// which never matches a connector.
    pub fn parse(value: &str) -> Self {
        DisplayOrder {
            names: value.split(',').map(|name| name.trim().to_string()).collect(),
        }
    }

    /// Connector names in order of preference
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns true if the last entry is the wildcard `...`
    ///
    /// In that case internal connectors are acceptable primary displays,
    /// if none of the listed connectors is connected.
    pub fn allows_any_internal(&self) -> bool {
        self.names
            .last()
            .map(|name| name == DISPLAY_ORDER_WILDCARD)
            .unwrap_or(false)
    }
}

impl Default for DisplayOrder {
    fn default() -> Self {
        DisplayOrder::parse(DISPLAY_ORDER_WILDCARD)
    }
}

impl<S: AsRef<str>> FromIterator<S> for DisplayOrder {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        DisplayOrder {
            names: iter.into_iter().map(|name| name.as_ref().to_string()).collect(),
        }
    }
}

/// Resource manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Device path, optionally ending in `%` to open all numbered nodes
    pub device_path: String,
    /// Preferred connectors for the primary display
    pub display_order: DisplayOrder,
    /// Force scaling through client composition
    pub scale_with_gpu: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device_path: DEFAULT_DEVICE_PATTERN.to_string(),
            display_order: DisplayOrder::default(),
            scale_with_gpu: false,
        }
    }
}

impl Config {
    /// Read the configuration from the environment
    pub fn from_env() -> Self {
        Config::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        Config {
            device_path: lookup(DEVICE_VAR)
                .filter(|path| !path.is_empty())
                .unwrap_or(defaults.device_path),
            display_order: lookup(DISPLAY_ORDER_VAR)
                .map(|order| DisplayOrder::parse(&order))
                .unwrap_or(defaults.display_order),
            scale_with_gpu: lookup(SCALE_WITH_GPU_VAR)
                .map(|x| parse_bool(&x))
                .unwrap_or(defaults.scale_with_gpu),
        }
    }

    /// Device paths described by [`Config::device_path`]
    ///
    /// Returns `None` for patterns (ending in `%`), see [`Config::device_pattern_prefix`].
    pub fn single_device(&self) -> Option<PathBuf> {
        (!self.device_path.ends_with('%')).then(|| PathBuf::from(&self.device_path))
    }

    /// Prefix to append node numbers to, if [`Config::device_path`] is a pattern
    pub fn device_pattern_prefix(&self) -> Option<&str> {
        self.device_path.strip_suffix('%')
    }
}

fn parse_bool(x: &str) -> bool {
    x == "1" || x.to_lowercase() == "true" || x.to_lowercase() == "yes" || x.to_lowercase() == "y"
}
