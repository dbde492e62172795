pub mod engagement;
pub mod field;
pub mod post;
pub mod user;
