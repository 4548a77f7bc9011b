pub mod driver;
pub mod library;
