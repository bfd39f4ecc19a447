//! Gateways shared by the billpay services: object storage, PGP crypto, secrets and
//! the audit table. Every gateway is a trait with a production implementation and an
//! in-memory implementation that is always compiled, so services can test against it.

pub mod audit;
pub mod crypto;
pub mod metrics;
pub mod object_store;
pub mod secrets;
