use crate::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hash any serializable value.
///
/// The value goes through `serde_json::Value` first, whose objects are
/// key-sorted, so struct and map field order never reaches the digest.
pub fn hash_object<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = serde_json::to_value(value)
        .map_err(|e| Error::serialization(format!("Failed to serialize hashable: {e}")))?;
    let bytes = serde_json::to_vec(&canonical)
        .map_err(|e| Error::serialization(format!("Failed to encode hashable: {e}")))?;
    let digest = Sha256::digest(bytes);
    Ok(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Serialize)]
    struct Pair<'a> {
        name: &'a str,
        value: u32,
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = hash_object(&Pair { name: "a", value: 1 }).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_map_insertion_order_irrelevant() {
        let mut a = HashMap::new();
        a.insert("x", 1);
        a.insert("y", 2);
        let mut b = HashMap::new();
        b.insert("y", 2);
        b.insert("x", 1);
        assert_eq!(hash_object(&a).unwrap(), hash_object(&b).unwrap());
        let c: BTreeMap<_, _> = a.into_iter().collect();
        assert_eq!(hash_object(&b).unwrap(), hash_object(&c).unwrap());
    }

    #[test]
    fn test_value_change_changes_hash() {
        assert_ne!(
            hash_object(&Pair { name: "a", value: 1 }).unwrap(),
            hash_object(&Pair { name: "a", value: 2 }).unwrap()
        );
    }

    #[test]
    fn test_list_order_is_significant() {
        // Sorting unordered lists is the caller's job
        assert_ne!(
            hash_object(&["a", "b"]).unwrap(),
            hash_object(&["b", "a"]).unwrap()
        );
    }
}
