//! HLS manifest model
//!
//! Parses master and media playlists into an owned model that the player
//! walks by media-sequence number.

pub mod cast;
pub mod error;
pub mod playlist;

pub use cast::{attr_name, cast_value, Attributes, Value};
pub use error::HlsError;
pub use playlist::{MasterPlaylist, MediaFragment, MediaPlaylist};
