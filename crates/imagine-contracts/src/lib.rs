pub mod events;
pub mod models;
pub mod render;
pub mod store;
