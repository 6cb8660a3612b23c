//! # ferridyn-collections
//!
//! Document collections over a DynamoDB-style key-value backend.
//!
//! JSON documents are stored in a single table inside an envelope that
//! carries the primary key, composite secondary-index keys derived from
//! declared access patterns, and an optional TTL. Child collections share
//! their parent's partition so a parent and its children can be read
//! together. Multi-item writes are submitted atomically with optional
//! idempotency tokens.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferridyn_collections::api::Context;
//! use ferridyn_collections::backend::MemoryBackend;
//! use ferridyn_collections::collection::{AccessPattern, CollectionDefinition, CollectionLayout};
//! use serde_json::json;
//!
//! # async fn run() -> ferridyn_collections::error::Result<()> {
//! let layout = CollectionLayout::new("app").find_key("gs1", "gs1p", Some("gs1s"));
//! let backend = MemoryBackend::new();
//! backend.ensure_table(&layout)?;
//!
//! let users = CollectionDefinition::root("users", layout.clone())
//!     .access_pattern(AccessPattern::new("gs1").partition_keys(["email"]))
//!     .build()?;
//! let addresses = CollectionDefinition::child("addresses", layout, "users", "userId").build()?;
//! let ctx = Context::new(backend, vec![users, addresses])?;
//!
//! let alice = ctx.replace("users", &json!({"email": "alice@example.com"}), None).await?;
//! let id = alice["_id"].as_str().unwrap_or_default();
//!
//! ctx.transaction()
//!     .replace("addresses", json!({"_id": "home", "userId": id, "city": "Sydney"}))
//!     .replace("users", json!({"_id": id, "email": "alice@example.com", "verified": true}))
//!     .execute()
//!     .await?;
//!
//! let home = ctx.find_child_by_id("addresses", "home", id).await?;
//! assert_eq!(home.unwrap()["city"], "Sydney");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backend;
pub mod collection;
pub mod condition;
pub mod error;
pub mod keys;
pub mod types;
pub mod wrapper;
