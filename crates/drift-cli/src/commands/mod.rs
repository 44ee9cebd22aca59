pub mod recommendations;
pub mod settings;
pub mod tick;
