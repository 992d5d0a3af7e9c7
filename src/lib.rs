//! Watch-driven reconciliation over resources stored under a different schema.
//!
//! A [`Controller`] mirrors one resource type from the apiserver and drives
//! an idempotent reconcile callback through a deduplicating, retrying work
//! queue. A [`TransformedClient`] lets that machinery, and anything else,
//! speak the native schema of a resource the cluster serves under another
//! one: writes are converted before they reach the server, reads and watch
//! payloads on the way back. A [`SchemaCache`] memoizes which structural
//! schema serves each (group, version, kind), invalidated coarsely from the
//! definition watch.

pub mod admission;
pub mod client;
pub mod controller;
pub mod key;
pub mod lister;
pub mod queue;
pub mod runner;
pub mod schema;

pub use admission::{Denial, MultiValidator, Operation, PolicyEvaluator, ReadyGate, Validator};
pub use client::transformed::{BridgeError, Bridged, ConvertError, TransformedClient};
pub use client::{ResourceClient, ResourceList, WatchStream};
pub use controller::{Controller, Informer, Options, RunError};
pub use key::{ParseKeyError, QualifiedName};
pub use lister::{Lister, NamespacedLister};
pub use queue::{RateLimiter, WorkQueue};
pub use runner::RunGroup;
pub use schema::{crd::CrdResolver, ResolveError, SchemaCache, SchemaKey, SchemaResolver};
