pub mod defs;
pub mod species;
pub mod store;
