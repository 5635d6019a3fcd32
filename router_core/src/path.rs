//! Signal path parsing and device-name hashing.
//!
//! Path format is `/device/signal`, where `device` is slash-free and `signal`
//! may itself contain slashes after the second `/`. Device-name comparisons
//! and hashing always operate on the substring up to the first internal `/`.

use crate::error::{RouterError, RouterResult};

/// Device names longer than this (in bytes, excluding a leading slash) are
/// rejected by `add_connection`.
pub const MAX_DEVICE_NAME_LEN: usize = 255;

/// Split `/device/signal` into its device and signal parts. The leading `/`
/// is optional on input but always implied. Returns `(device, signal)` with
/// neither containing a leading slash.
pub fn parse_signal_path(path: &str) -> RouterResult<(&str, &str)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let slash = trimmed
        .find('/')
        .ok_or_else(|| RouterError::BadName(path.to_string()))?;
    let (device, rest) = trimmed.split_at(slash);
    let signal = &rest[1..];
    if device.is_empty() || signal.is_empty() {
        return Err(RouterError::BadName(path.to_string()));
    }
    if device.len() >= MAX_DEVICE_NAME_LEN + 1 {
        return Err(RouterError::NameTooLong(path.to_string()));
    }
    Ok((device, signal))
}

/// Extract just the device-name prefix of a path or bare link name, the way
/// `find_link_by_remote_name` and `match_slot` do: the portion before the
/// first internal `/`, ignoring one leading slash.
pub fn device_name_prefix(name: &str) -> &str {
    let trimmed = name.strip_prefix('/').unwrap_or(name);
    match trimmed.find('/') {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    }
}

/// CRC-32/zlib hash of a device name, used as the scope-set key and as the
/// primary key for link-by-hash lookup. Hash 0 is reserved as a scope
/// wildcard, so a device whose name legitimately hashes to 0 is not treated
/// specially here -- that coincidence is astronomically unlikely and the
/// original makes the same simplifying assumption.
pub fn hash_device_name(name: &str) -> u32 {
    let bare = name.strip_prefix('/').unwrap_or(name);
    crc32fast::hash(bare.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_path() {
        let (device, signal) = parse_signal_path("/testsend/outsig").unwrap();
        assert_eq!(device, "testsend");
        assert_eq!(signal, "outsig");
    }

    #[test]
    fn signal_part_may_contain_slashes() {
        let (device, signal) = parse_signal_path("/robot/joints/shoulder").unwrap();
        assert_eq!(device, "robot");
        assert_eq!(signal, "joints/shoulder");
    }

    #[test]
    fn rejects_path_without_second_segment() {
        assert!(parse_signal_path("/justdevice").is_err());
    }

    #[test]
    fn rejects_oversized_device_name() {
        let long_device = "d".repeat(300);
        let path = format!("/{}/sig", long_device);
        assert!(matches!(
            parse_signal_path(&path),
            Err(RouterError::NameTooLong(_))
        ));
    }

    #[test]
    fn device_name_prefix_stops_at_first_slash() {
        assert_eq!(device_name_prefix("/testsend/outsig"), "testsend");
        assert_eq!(device_name_prefix("testsend"), "testsend");
    }

    #[test]
    fn hash_is_stable_and_ignores_leading_slash() {
        assert_eq!(hash_device_name("testsend"), hash_device_name("/testsend"));
        assert_ne!(hash_device_name("testsend"), hash_device_name("testrecv"));
    }

    #[test]
    fn hash_uses_the_named_strings_own_length() {
        // Guards against computing a scope hash over one device name's bytes
        // but another's length.
        let short = "ab";
        let long = "abcdef";
        assert_ne!(hash_device_name(short), hash_device_name(long));
        assert_eq!(hash_device_name(long), crc32fast::hash(long.as_bytes()));
    }
}
