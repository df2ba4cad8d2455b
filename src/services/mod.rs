// Services module - Business logic

pub mod assignment;
pub mod bundle_vault;
pub mod card_issuer;
pub mod card_vault;
pub mod encryption;
pub mod issuer_directory;
pub mod lifecycle;
pub mod system_defaults;
