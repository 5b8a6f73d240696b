use std::collections::BTreeMap;

/// Variables folded into every global hash.
pub const BUILTIN_ENV_VARS: &[&str] = &["STRATA_ANALYTICS_ID"];

/// Variables whose name contains this marker are hashed automatically, so
/// users can force invalidation by exporting e.g. `STRATA_HASH_SALT=2`.
pub const HASH_ENV_MARKER: &str = "STRATA_HASH";

/// Session and auth variables that carry the marker but never affect outputs.
const MARKER_EXCLUSIONS: &[&str] = &["STRATA_HASH_TOKEN", "STRATA_HASH_TEAM"];

/// A snapshot of environment variables, sorted by name.
///
/// Hashing reads from a snapshot rather than the live process so that one
/// run sees one consistent environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentVariableMap(BTreeMap<String, String>);

impl EnvironmentVariableMap {
    /// Snapshot the current process environment.
    ///
    /// Variables that are not valid Unicode are skipped.
    #[must_use]
    pub fn from_process() -> Self {
        Self(std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect())
    }

    /// Value of a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// `NAME=value` pairs for `names`, sorted.
    ///
    /// An unset variable contributes `NAME=`.
    #[must_use]
    pub fn pairs_for<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        let mut pairs: Vec<String> = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                format!("{name}={}", self.get(name).unwrap_or_default())
            })
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    /// Names of all variables that opted into hashing via [`HASH_ENV_MARKER`].
    #[must_use]
    pub fn marker_names(&self) -> Vec<String> {
        self.0
            .keys()
            .filter(|name| name.contains(HASH_ENV_MARKER))
            .filter(|name| !MARKER_EXCLUSIONS.contains(&name.as_str()))
            .cloned()
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvironmentVariableMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
