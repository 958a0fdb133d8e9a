//! Concrete resources for MongoDB host convergence
//!
//! Every assertion variant lives in its own module and implements the
//! [`converge::Resource`] trait: probe current state, compare against
//! desired, mutate only when needed.

pub mod directory;
pub mod file;
pub mod group;
pub mod package;
pub mod replica_set;
pub mod service;
pub mod user;

pub use directory::DirectoryNode;
pub use file::{FileNode, FileDesired};
pub use group::Group;
pub use package::{PipPackage, SystemPackage};
pub use replica_set::{MemberSpec, ReplicaSet, ReplicaSetTarget};
pub use service::ServiceRestart;
pub use user::UserAccount;
