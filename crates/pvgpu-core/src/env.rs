//! Environment variable helpers for `PVGPU_*` tunables.
//!
//! Unset or unparsable values fall back to the supplied default; tunables
//! never fail startup.

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, or return `default`.
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if set and valid.
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// "1", "true", "yes", "on" are true; "0", "false", "no", "off" are false.
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Parse a bitmask given as decimal or `0x`-prefixed hex.
pub fn env_get_bits(key: &str) -> Option<u32> {
    let raw = std::env::var(key).ok()?;
    parse_bits(&raw)
}

fn parse_bits(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// Duration given in microseconds.
pub fn env_get_micros(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_micros)
        .unwrap_or(default)
}

/// Duration given in milliseconds.
pub fn env_get_millis(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names; tests run in parallel.

    #[test]
    fn test_get_default_when_unset() {
        assert_eq!(env_get("PVGPU_TEST_UNSET_A", 9usize), 9);
        assert!(env_get_opt::<u32>("PVGPU_TEST_UNSET_B").is_none());
        assert!(env_get_bool("PVGPU_TEST_UNSET_C", true));
    }

    #[test]
    fn test_get_parsed() {
        std::env::set_var("PVGPU_TEST_PORTS", " 3 ");
        assert_eq!(env_get("PVGPU_TEST_PORTS", 2usize), 3);
        std::env::set_var("PVGPU_TEST_FLAG", "off");
        assert!(!env_get_bool("PVGPU_TEST_FLAG", true));
        std::env::set_var("PVGPU_TEST_SPIN", "250");
        assert_eq!(
            env_get_micros("PVGPU_TEST_SPIN", Duration::ZERO),
            Duration::from_micros(250)
        );
    }

    #[test]
    fn test_parse_bits() {
        assert_eq!(parse_bits("0x1f"), Some(0x1F));
        assert_eq!(parse_bits("0X4"), Some(4));
        assert_eq!(parse_bits("7"), Some(7));
        assert_eq!(parse_bits("zz"), None);
    }
}
