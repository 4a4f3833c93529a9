//! Auxiliary HTTP servers.

mod prom;

pub use prom::spawn_prom_server;
