//! Supervision of long-running bot workers.

pub mod supervisor;
pub mod task;

pub use supervisor::{Supervisor, TaskSnapshot};
pub use task::{SupervisedTask, TaskStatus};
