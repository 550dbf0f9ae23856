pub mod player;

pub use player::PlayerService;
