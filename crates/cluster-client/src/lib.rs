//! Cluster Client
//!
//! The small slice of the Kubernetes API the remediation controller needs:
//! fetch a `Configuration`, fetch and list `Deployment`s, and replace a
//! `Deployment` under optimistic concurrency.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, ClusterClientTrait, ClusterError};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClusterClient::new(kube::Client::try_default().await?);
//!
//! let mut deployment = client.get_deployment("default", "web").await?;
//! deployment
//!     .metadata
//!     .annotations
//!     .get_or_insert_with(Default::default)
//!     .insert("example.com/touched".to_string(), "yes".to_string());
//!
//! match client.replace_deployment(&deployment).await {
//!     Ok(_) => {}
//!     Err(ClusterError::Conflict(_)) => { /* someone else wrote first; retry later */ }
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::ClusterClient;
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockClusterClient, ReplaceFault};
