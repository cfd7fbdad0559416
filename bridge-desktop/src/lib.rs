//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `KeyValueStore` using a SQLite table via `sqlx`
//! - `ConnectionTypeProvider` using a TCP reachability check
//!
//! WebSocket transports are left to the host application.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteKeyValueStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::try_new()?;
//!     let store = SqliteKeyValueStore::new("data/client.db".into()).await?;
//!
//!     // Use in core configuration
//!     Ok(())
//! }
//! ```

mod http;
mod network;
mod storage;

pub use http::ReqwestHttpClient;
pub use network::DesktopConnectionTypeProvider;
pub use storage::SqliteKeyValueStore;
