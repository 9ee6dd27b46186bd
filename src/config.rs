//! Environment-supplied tunables.
//!
//! Every variable is optional and every parse failure falls back to the
//! documented default with a warning; a malformed environment never fails
//! the session.

use std::env;
use std::str::FromStr;

/// PAL master clock in cycles per second.
pub const DEFAULT_TARGET_HZ: u64 = 985_248;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Which joystick port host input maps onto.
    pub joystick_index: u8,
    /// Accelerated tape/disk loading.
    pub fast_load: bool,
    /// Preserve the display aspect ratio when the host window resizes.
    pub keep_aspect: bool,
    /// Target emulated cycle rate.
    pub target_speed_hz: u64,
    /// Raster down-scale factor in (0, 1].
    pub scale: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            joystick_index: 0,
            fast_load: false,
            keep_aspect: true,
            target_speed_hz: DEFAULT_TARGET_HZ,
            scale: 1.0,
        }
    }
}

impl Config {
    /// Read configuration from `PAL64_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut config = defaults.clone();
        config.joystick_index = parse_or(
            get("PAL64_JOYSTICK").as_deref(),
            "PAL64_JOYSTICK",
            defaults.joystick_index,
        );
        config.fast_load = parse_flag(
            get("PAL64_FASTLOAD").as_deref(),
            "PAL64_FASTLOAD",
            defaults.fast_load,
        );
        config.keep_aspect = parse_flag(
            get("PAL64_KEEP_ASPECT").as_deref(),
            "PAL64_KEEP_ASPECT",
            defaults.keep_aspect,
        );
        config.target_speed_hz = parse_or(
            get("PAL64_SPEED_HZ").as_deref(),
            "PAL64_SPEED_HZ",
            defaults.target_speed_hz,
        );
        if config.target_speed_hz == 0 {
            log::warn!("PAL64_SPEED_HZ must be positive, using {DEFAULT_TARGET_HZ}");
            config.target_speed_hz = DEFAULT_TARGET_HZ;
        }
        config.scale = parse_or(get("PAL64_SCALE").as_deref(), "PAL64_SCALE", defaults.scale);
        if !(config.scale > 0.0 && config.scale <= 1.0) {
            log::warn!("PAL64_SCALE must be in (0, 1], using 1.0");
            config.scale = 1.0;
        }
        config
    }
}

fn parse_or<T: FromStr + Copy>(value: Option<&str>, key: &str, default: T) -> T {
    match value {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("could not parse {key}={raw:?}, using default");
            default
        }),
    }
}

fn parse_flag(value: Option<&str>, key: &str, default: bool) -> bool {
    match value {
        None => default,
        Some(raw) => match raw.trim() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                log::warn!("could not parse {key}={other:?}, using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config, Config::default());
        assert_eq!(config.target_speed_hz, DEFAULT_TARGET_HZ);
    }

    #[test]
    fn valid_values_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("PAL64_JOYSTICK", "1"),
            ("PAL64_FASTLOAD", "yes"),
            ("PAL64_KEEP_ASPECT", "off"),
            ("PAL64_SPEED_HZ", "1000000"),
            ("PAL64_SCALE", "0.5"),
        ]));
        assert_eq!(config.joystick_index, 1);
        assert!(config.fast_load);
        assert!(!config.keep_aspect);
        assert_eq!(config.target_speed_hz, 1_000_000);
        assert_eq!(config.scale, 0.5);
    }

    #[test]
    fn parse_failures_fall_back_per_field() {
        let config = Config::from_lookup(lookup(&[
            ("PAL64_JOYSTICK", "second"),
            ("PAL64_FASTLOAD", "maybe"),
            ("PAL64_SPEED_HZ", "fast"),
            ("PAL64_SCALE", "0.25"),
        ]));
        // Bad fields default, good fields still apply.
        assert_eq!(config.joystick_index, 0);
        assert!(!config.fast_load);
        assert_eq!(config.target_speed_hz, DEFAULT_TARGET_HZ);
        assert_eq!(config.scale, 0.25);
    }

    #[test]
    fn out_of_range_values_rejected() {
        let config = Config::from_lookup(lookup(&[
            ("PAL64_SPEED_HZ", "0"),
            ("PAL64_SCALE", "2.5"),
        ]));
        assert_eq!(config.target_speed_hz, DEFAULT_TARGET_HZ);
        assert_eq!(config.scale, 1.0);
    }
}
