pub mod admin;
pub mod items;
pub mod public;
pub mod schema;
