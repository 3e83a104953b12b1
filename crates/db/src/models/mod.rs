pub mod redirect;
pub mod settings;
