// Models module - Database entity representations

pub mod actor;
pub mod assignment;
pub mod bundle;
pub mod card;
pub mod card_request;
pub mod issuer;
pub mod system_defaults;

pub use actor::{Actor, Role};
pub use assignment::UserCardAssignment;
pub use bundle::BundlePool;
pub use card::CardRecord;
pub use card_request::CardRequest;
pub use issuer::Issuer;
pub use system_defaults::SystemDefaults;
