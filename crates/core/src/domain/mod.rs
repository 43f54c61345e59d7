pub mod archive;
pub mod employee;
pub mod notification;
pub mod request;
pub mod verification;
