pub mod location;
pub mod rules;
pub mod types;
