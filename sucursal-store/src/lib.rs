mod local_store;
mod model;
mod registry;
mod sqlite_store;

pub use local_store::LocalStore;
pub use model::{Article, ArticleStock, Customer, CustomerStatus, ShippingGuide};
pub use registry::{BranchInfo, BranchSeed, MembershipRegistry, NodeStatus};
pub use sqlite_store::SqliteStore;
