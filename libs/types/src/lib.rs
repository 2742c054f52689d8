//! # Cluster Types Library
//!
//! Identifier types shared by every cluster component.
//!
//! ## Design Philosophy
//!
//! - **One Encoding**: every id is a compound of up to four 128-bit fields
//!   (instance, application, resource, task) with a single string and a
//!   single binary layout
//! - **Exact Field Sets**: an id type only ever holds its own fields, so a
//!   `TaskId` string can never be parsed as a `ResourceId`
//! - **Immutable**: ids never change after construction; renderings are
//!   cached on first use
//!
//! ## Quick Start
//!
//! ```rust
//! use cluster_types::{ApplicationId, InstanceId, NodeId};
//!
//! let instance = InstanceId::random();
//! let application = ApplicationId::random();
//! let node = NodeId::for_instance_and_application(&instance, &application);
//!
//! let parsed: NodeId = node.as_str().parse().unwrap();
//! assert_eq!(parsed.application_id(), application);
//! ```

pub mod id;

pub use id::{
    ApplicationId, Field, IdError, InstanceId, InvalidIdError, NodeId, ResourceId, TaskId,
};
