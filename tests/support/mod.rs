pub mod data;
pub mod state;
