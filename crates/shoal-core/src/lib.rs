//! # Fragments, Actions, and Stores
//!
//! Shoal keeps application state in small, independently declared
//! *fragments* and combines them into one store that is observed as a single
//! stream. There are four main pieces:
//!
//! - `Scope::declare_state`: a fragment with pure handlers.
//! - `Scope::declare_effect`: a side-effect stream keyed to an action.
//! - `Scope::declare_preload_effect`: a producer gating store readiness.
//! - `create_store`: runs the initializer once and returns a `Store`.
//!
//! ## Declaring fragments
//!
//! An initializer receives a `Scope`, declares fragments, and returns the
//! state stream to publish together with the creators to bind:
//!
//! ```rust
//! use shoal_core::*;
//!
//! let store = create_store(
//!     |scope: &Scope| -> Result<Root<i64>> {
//!         let counter = scope.declare_state(
//!             FragmentDecl::new(0i64)
//!                 .named("counter")
//!                 .on("increment", |n| n + 1)
//!                 .on_payload("add", |n, by: &i64| n + by),
//!         )?;
//!         Ok(Root::new(counter.state, counter.actions))
//!     },
//!     StoreOptions::default(),
//! )
//! .unwrap();
//!
//! let _sub = store.subscribe(|n| println!("counter = {n}"));
//! store.actions().find("increment").unwrap().call();
//! store.actions().find("add").unwrap().send(10i64);
//! assert_eq!(store.current(), Some(11));
//! ```
//!
//! Handlers never run outside `dispatch`. A handler taking a payload builds a
//! creator that carries one; `on` and `on_constant` handlers build creators
//! that drop any payload they are given.
//!
//! ## Batching
//!
//! Dispatching a list publishes once, after the last action:
//!
//! ```rust
//! # use shoal_core::*;
//! # let store = create_store(
//! #     |scope: &Scope| -> Result<Root<i64>> {
//! #         let c = scope.declare_state(FragmentDecl::new(0i64).on("increment", |n| n + 1))?;
//! #         Ok(Root::new(c.state, c.actions))
//! #     },
//! #     StoreOptions::default(),
//! # ).unwrap();
//! # let _sub = store.subscribe(|_| {});
//! let increment = store.actions().find("increment").unwrap().clone();
//! store.batch(|| {
//!     increment.call();
//!     increment.call();
//! });
//! assert_eq!(store.current(), Some(2));
//! ```
//!
//! ## Effects and readiness
//!
//! Effect producers map the payloads of their trigger into further actions;
//! the store dispatches whatever they emit. Preload producers hold back every
//! publication until each of them has emitted once, then their first
//! emissions are dispatched as one list.

pub mod action;
pub mod aggregator;
pub mod batch;
pub mod bound;
pub mod channel;
pub mod effects;
pub mod error;
pub mod monitor;
pub mod options;
pub mod prelude;
pub mod runtime;
pub mod scope;
pub mod state;
pub mod store;
pub mod stream;
pub mod subscription;

pub use prelude::*;
