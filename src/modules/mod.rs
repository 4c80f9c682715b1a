pub mod bot;
pub mod settings;
