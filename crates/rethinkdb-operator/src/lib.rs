pub mod cluster_controller;
pub mod config;
pub mod crds;
pub mod error;
pub mod members;
pub mod membership;
pub mod pki;
pub mod resources;
pub mod secrets;
pub mod services;
pub mod store;
pub mod upgrade;

#[cfg(test)]
mod testing;
