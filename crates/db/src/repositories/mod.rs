pub mod redirect_repo;
pub mod settings_repo;
pub mod structure_repo;

pub use redirect_repo::RedirectRepo;
pub use settings_repo::SettingsRepo;
pub use structure_repo::StructureRepo;
