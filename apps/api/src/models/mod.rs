pub mod application;
pub mod credential;
pub mod user;
pub mod vacancy;
