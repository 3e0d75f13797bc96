use std::path::PathBuf;

/// Errors produced by the `cutover-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The source container carried no `Config` section.
    #[error("container {id}: source config is missing")]
    MissingConfig { id: String },

    /// The source container document could not be decoded.
    #[error("malformed container document: {0}")]
    MalformedContainer(#[source] serde_json::Error),

    /// A container name does not follow the `k8s_POD_<name>_<ns>_<uid>_<attempt>` pattern.
    #[error("invalid sandbox name {name:?}: {reason}")]
    InvalidSandboxName { name: String, reason: String },

    /// The quota ID label is not a number.
    #[error("invalid quota id {value:?}")]
    InvalidQuotaId { value: String },

    /// A quota ID was configured without a size limit.
    #[error("quota id {quota_id} is set but no default quota size is configured")]
    QuotaSizeMissing { quota_id: u32 },

    /// A quota size string could not be parsed.
    #[error("invalid quota size {value:?}")]
    InvalidQuotaSize { value: String },

    /// An image reference is empty or otherwise unusable.
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidImageReference { reference: String, reason: String },

    /// An image has no layers, so no chain ID can be derived.
    #[error("image {reference} has no layer diff ids")]
    EmptyRootfs { reference: String },

    /// The resolver file of a sandbox could not be read.
    #[error("failed to read resolv.conf {path}: {source}")]
    ResolvConf {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
