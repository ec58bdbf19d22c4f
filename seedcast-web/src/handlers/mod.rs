//! HTTP request handlers organized by functionality

pub mod control;
pub mod torrents;

// Re-export handler functions
pub use control::{complete_send, recv, send, send_times, status};
pub use torrents::{
    CreateTorrentRequest, DownloadFinished, SeedingStarted, TorrentStatus, create_torrent,
    get_torrent_status, read_piece, start_downloading, start_seeding, stop_seeding,
};
