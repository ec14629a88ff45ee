pub mod assets;
pub mod batch;
pub mod downloader;
pub mod fallback;
pub mod library;
pub mod natives;
pub mod verify;
