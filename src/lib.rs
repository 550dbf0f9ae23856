pub mod archive;
pub mod config;
pub mod epg;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod playback;
pub mod services;
pub mod sources;
pub mod utils;
