pub mod catalog;
pub mod config;
pub mod display;
pub mod files;
pub mod store;
pub mod tasks {
    pub mod rotation;
}
