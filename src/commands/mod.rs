pub mod admin;
pub mod voice;
