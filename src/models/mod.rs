pub mod address;
pub mod folder;
pub mod image;
pub mod scan;
pub mod search;
pub mod settings;
