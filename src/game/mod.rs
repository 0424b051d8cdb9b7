pub mod engine;
pub mod food;
pub mod outbound;
pub mod physics;
pub mod player;
pub mod spatial;
pub mod wager;
pub mod world;
