//! scopedloader-scope: named loaders whose state lives for one unit of work.
//!
//! # Overview
//!
//! A loader is bound once at startup under a name. Callers hold a
//! [`LoaderHandle`] for the life of the process; each call on it resolves the
//! [`DataLoader`](scopedloader_core::DataLoader) of the active
//! [`RequestScope`], creating it on first use. Dropping the scope drops its
//! loaders; values still queued on them resolve to
//! [`LoadError::Cancelled`](scopedloader_core::LoadError::Cancelled).
//!
//! - [`LoaderBinder`] / [`LoaderModule`]: startup-time binding and typed
//!   handle lookup
//! - [`LoaderDescriptor`]: key and value types taken from the batch
//!   function's associated types
//! - [`ScopedLoaderFactory`]: one loader per (scope, name)
//! - [`LoaderRegistry`]: name → handle, plus "dispatch everything active in
//!   this scope"
//! - [`RequestScope`] / [`ScopeProvider`]: the scoping collaborator
//!
//! # Quick Start
//!
//! ```no_run
//! use scopedloader_core::{BatchError, BatchLoader, Loader};
//! use scopedloader_scope::{LoaderBinder, RequestScope};
//!
//! struct Greeting;
//!
//! #[async_trait::async_trait]
//! impl BatchLoader for Greeting {
//!     type Key = String;
//!     type Value = String;
//!
//!     async fn load(&self, keys: Vec<String>) -> Result<Vec<String>, BatchError> {
//!         Ok(keys.iter().map(|k| format!("Hello {k}")).collect())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut binder = LoaderBinder::new();
//! binder.bind("greeting").to_batch_loader(Greeting)?;
//! let module = binder.build();
//! let greeting = module.handle::<String, String>("greeting")?;
//! let registry = module.registry();
//!
//! // once per request
//! RequestScope::new()
//!     .run(async {
//!         let pending = greeting.load("Bill".into())?;
//!         registry.dispatch_all().await?;
//!         assert_eq!(pending.await?, "Hello Bill");
//!         Ok::<_, Box<dyn std::error::Error>>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod binder;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod handle;
pub mod registry;
pub mod scope;

pub use binder::{BindingBuilder, LoaderBinder, LoaderModule};
pub use config::BinderConfig;
pub use descriptor::{BatchKind, LoaderDescriptor, LoaderName, TypeDescriptor};
pub use error::BindError;
pub use factory::ScopedLoaderFactory;
pub use handle::{LoaderHandle, RegisteredLoader};
pub use registry::{LoaderRegistry, ScopedRegistry};
pub use scope::{in_request_scope, RequestScope, ScopeKey, ScopeProvider, TaskLocalScope};
