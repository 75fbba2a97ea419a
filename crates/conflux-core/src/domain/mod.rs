//! Domain model (ids, tasks, policies).

pub mod ids;
pub mod policy;
pub mod task;

pub use ids::DispatchId;
pub use policy::Policy;
pub use task::Task;
