pub mod engine;
pub mod font;
pub mod layout;
