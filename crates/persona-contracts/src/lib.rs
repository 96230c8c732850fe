pub mod characters;
pub mod events;
pub mod models;
pub mod providers;
