use thiserror::Error;

/// Manifest model errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HlsError {
    /// First line is not the `#EXTM3U` marker.
    #[error("Malformed manifest: expected #EXTM3U, found {first_line:?}")]
    MalformedManifest { first_line: String },

    /// The slot where `wanted` should live holds a different sequence number
    /// (or the playlist is empty, `found == None`).
    #[error("Missed fragment {wanted}: fragments are not numbered sequentially (found {found:?})")]
    MissedFragment { wanted: i64, found: Option<i64> },
}

pub type Result<T> = std::result::Result<T, HlsError>;
