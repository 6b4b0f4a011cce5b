/// Errors raised while setting up shared memory or the notification event.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// A zero-length region was requested.
    #[error("shared region size must be greater than zero")]
    ZeroSize,

    /// Mapping the shared region failed.
    #[error("failed to map {len} bytes of shared memory: {source}")]
    Map {
        len: usize,
        source: std::io::Error,
    },

    /// Creating, signalling or waiting on the notification event failed.
    #[error("notification event error: {0}")]
    Event(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShmError>;
