//! Image reference normalization and layer chain IDs.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::CoreError;

pub const DEFAULT_REGISTRY: &str = "registry.hub.docker.com";
pub const DEFAULT_NAMESPACE: &str = "library";

/// A fully qualified image reference: `registry/path[:tag|@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageRef(String);

impl ImageRef {
    /// Qualify `reference` with the default registry and namespace and a
    /// `latest` tag where they are missing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidImageReference`] for empty or whitespace
    /// bearing references.
    pub fn normalize(reference: &str) -> Result<Self, CoreError> {
        Self::normalize_with(reference, DEFAULT_REGISTRY, DEFAULT_NAMESPACE)
    }

    /// [`ImageRef::normalize`] with an explicit default registry and namespace.
    ///
    /// # Errors
    ///
    /// See [`ImageRef::normalize`].
    pub fn normalize_with(
        reference: &str,
        registry: &str,
        namespace: &str,
    ) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidImageReference {
            reference: reference.to_owned(),
            reason: reason.to_owned(),
        };
        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (first, rest) = match reference.split_once('/') {
            Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
                (first, rest)
            }
            _ => (registry, reference),
        };
        if rest.is_empty() || rest.starts_with('/') {
            return Err(invalid("empty repository path"));
        }

        let mut full = if first == registry && !rest.contains('/') {
            format!("{first}/{namespace}/{rest}")
        } else {
            format!("{first}/{rest}")
        };

        let last = rest.rsplit('/').next().unwrap_or(rest);
        if !last.contains(':') && !last.contains('@') {
            full.push_str(":latest");
        }
        Ok(Self(full))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chain ID of an ordered layer stack.
///
/// `chain[0] = diff[0]`, `chain[i] = sha256(chain[i-1] + " " + diff[i])`.
///
/// # Errors
///
/// Returns [`CoreError::EmptyRootfs`] when `diff_ids` is empty.
pub fn chain_id(reference: &str, diff_ids: &[String]) -> Result<String, CoreError> {
    let Some((first, rest)) = diff_ids.split_first() else {
        return Err(CoreError::EmptyRootfs { reference: reference.to_owned() });
    };
    Ok(rest.iter().fold(first.clone(), |parent, diff| {
        let digest = Sha256::digest(format!("{parent} {diff}").as_bytes());
        format!("sha256:{}", hex(&digest))
    }))
}

fn hex(bytes: &[u8]) -> String {
    use fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn norm(reference: &str) -> String {
        match ImageRef::normalize(reference) {
            Ok(r) => r.to_string(),
            Err(e) => panic!("normalize {reference} failed: {e}"),
        }
    }

    #[test]
    fn normalize_short_names() {
        assert_eq!(norm("busybox"), "registry.hub.docker.com/library/busybox:latest");
        assert_eq!(norm("nginx:1.25"), "registry.hub.docker.com/library/nginx:1.25");
        assert_eq!(norm("team/app"), "registry.hub.docker.com/team/app:latest");
    }

    #[test]
    fn normalize_keeps_explicit_registries() {
        assert_eq!(norm("reg.example.com/app/web:v1"), "reg.example.com/app/web:v1");
        assert_eq!(norm("localhost:5000/web"), "localhost:5000/web:latest");
        assert_eq!(
            norm("busybox@sha256:abcd"),
            "registry.hub.docker.com/library/busybox@sha256:abcd"
        );
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(ImageRef::normalize("").is_err());
        assert!(ImageRef::normalize("a b").is_err());
        assert!(ImageRef::normalize("reg.io/").is_err());
    }

    #[test]
    fn chain_id_of_single_layer_is_the_diff_id() {
        let diff = vec!["sha256:aaaa".to_owned()];
        assert_eq!(chain_id("img", &diff).ok().as_deref(), Some("sha256:aaaa"));
    }

    #[test]
    fn chain_id_of_empty_stack_fails() {
        assert!(matches!(chain_id("img", &[]), Err(CoreError::EmptyRootfs { .. })));
    }

    #[test]
    fn chain_id_depends_on_order() {
        let a = vec!["sha256:01".to_owned(), "sha256:02".to_owned()];
        let b = vec!["sha256:02".to_owned(), "sha256:01".to_owned()];
        assert_ne!(chain_id("img", &a).ok(), chain_id("img", &b).ok());
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(name in "[a-z][a-z0-9]{0,10}(/[a-z][a-z0-9]{0,10})?(:[a-z0-9]{1,6})?") {
            let once = norm(&name);
            prop_assert_eq!(norm(&once), once.clone());
            prop_assert!(once.starts_with("registry.hub.docker.com/"));
        }

        #[test]
        fn chain_id_has_sha256_shape(diffs in prop::collection::vec("[0-9a-f]{8}", 2..6)) {
            let diffs: Vec<String> = diffs.into_iter().map(|d| format!("sha256:{d}")).collect();
            let id = chain_id("img", &diffs).expect("non-empty stack");
            prop_assert!(id.starts_with("sha256:"));
            prop_assert_eq!(id.len(), "sha256:".len() + 64);
        }
    }
}
