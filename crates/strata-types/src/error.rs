use thiserror::Error;

pub type Result<T> = std::result::Result<T, StrataError>;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("repository not found at '{0}'")]
    RepoNotFound(String),

    #[error("repository already exists at '{0}'")]
    RepoAlreadyExists(String),

    #[error("no matching ID found for prefix \"{0}\"")]
    SnapshotNotFound(String),

    #[error("prefix \"{0}\" matches more than one snapshot")]
    AmbiguousSnapshot(String),

    #[error("snapshot {0} has no tree")]
    MalformedSnapshot(String),

    #[error("tree {0} not found in repository")]
    TreeNotFound(String),

    #[error("repository is already locked (lock: {0})")]
    Locked(String),

    #[error("{0}")]
    Usage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid repository format: {0}")]
    InvalidFormat(String),

    #[error("unsupported backend: '{0}'")]
    UnsupportedBackend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation interrupted")]
    Interrupted,

    #[error("unable to rewrite snapshot ID \"{snapshot}\": {source}")]
    Rewrite {
        snapshot: String,
        #[source]
        source: Box<StrataError>,
    },

    #[error("{0}")]
    Other(String),
}

impl StrataError {
    /// Wrap an error raised while processing one snapshot.
    pub fn rewrite(snapshot: impl Into<String>, source: StrataError) -> Self {
        StrataError::Rewrite {
            snapshot: snapshot.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through `Rewrite` wrappers.
    pub fn root(&self) -> &StrataError {
        match self {
            StrataError::Rewrite { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.root(), StrataError::Interrupted)
    }
}
