//! Message builder: encodes one value (or release token) as a wire message
//! against a slot.

use crate::wire::{InstanceTag, Message};

/// The per-output typestring for a vectorized message: `dest.length * count`
/// copies of the destination's type character.
pub fn vector_typestring(value_type: char, total_elements: usize) -> String {
    std::iter::repeat(value_type).take(total_elements).collect()
}

/// Build one wire message for `path`. `values = None` produces an
/// instance-release token (empty payload); `id = Some(_)` marks the
/// message as instance-bearing, carrying `(origin_hash, instance_id)` so
/// the peer can attribute the update to a lineage.
pub fn build_message(
    path: &str,
    typestring: &str,
    values: Option<&[f64]>,
    origin_hash: Option<(u32, u32)>,
) -> Message {
    Message {
        path: path.to_string(),
        typestring: typestring.to_string(),
        args: values.map(|v| v.to_vec()).unwrap_or_default(),
        instance: origin_hash.map(|(origin_hash, instance_id)| InstanceTag {
            origin_hash,
            instance_id,
        }),
        response_path: None,
    }
}

/// Build a `/get` query message: carries the local response path plus the
/// expected length/type of the reply, and is never instance-bearing.
pub fn build_query_message(
    remote_get_path: &str,
    local_response_path: &str,
    length: usize,
    value_type: char,
) -> Message {
    Message {
        path: remote_get_path.to_string(),
        typestring: value_type.to_string(),
        args: vec![length as f64],
        instance: None,
        response_path: Some(local_response_path.to_string()),
    }
}

/// Convenience for the common case of a non-instanced single-sample
/// update.
pub fn build_scalar_message(path: &str, typestring: &str, values: &[f64]) -> Message {
    build_message(path, typestring, Some(values), None)
}

/// Convenience for an instance release.
pub fn build_release_message(path: &str, origin_hash: u32, instance_id: u32) -> Message {
    build_message(path, "", None, Some((origin_hash, instance_id)))
}
