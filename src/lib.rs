pub mod audit;
pub mod auth;
pub mod config;
pub mod customers;
pub mod email;
pub mod estimates;
pub mod inventory;
pub mod parts;
pub mod public;
pub mod roles;
pub mod settings;
pub mod shared;
pub mod team;
pub mod tickets;
