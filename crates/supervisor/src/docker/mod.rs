// Runtime adapter: everything that talks to the docker / docker-compose CLI.

pub mod client;
pub mod container;
pub mod event;
pub mod inventory;
pub mod model;
