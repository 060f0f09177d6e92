//! Client for a live vessel-tracking WebSocket feed
//!
//! Connects with an access token, keeps the session alive, normalizes vessel
//! records of both upstream shapes and publishes consistent snapshots.

pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod decoder;
pub mod errors;
pub mod filter;
pub mod models;
pub mod normalizer;

pub use client::{FeedClient, FeedSnapshot};
pub use config::{AppConfig, FeedConfig};
pub use connection::ConnectionStatus;
pub use credentials::CredentialProvider;
pub use errors::{FeedError, SessionError};
pub use filter::VesselFilter;
pub use models::{ConnectivityStatus, Vessel};
