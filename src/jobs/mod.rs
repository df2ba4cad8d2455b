// Background jobs

pub mod card_release;
