#![allow(dead_code)]

pub mod entities;
pub mod repositories;

pub use entities::{Order, User};
pub use repositories::{OrderRepository, UserRepository};