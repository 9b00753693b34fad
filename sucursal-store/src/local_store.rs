use sucursal_base::{RowId, Result};
use sucursal_proto::Op;

use crate::model::{Article, Customer, ShippingGuide};

/// Typed operations over the replicated entities (spec §2 component 3,
/// §4.3's verb table). This is the only collaborator the Quorum
/// Participant's APPLY-LOCAL step and the UI talk to; the actual
/// relational engine behind it is explicitly out of scope (spec §1) and
/// swappable.
pub trait LocalStore: Send + Sync {
    /// Applies a decided (or locally-originated, pre-quorum) mutation.
    /// Callers are responsible for validation (duplicate username/card/
    /// code) *before* this is reached — by the time `apply` runs, the
    /// operation has already won a quorum vote or passed a solo check.
    fn apply(&self, op: &Op) -> Result<()>;

    fn username_exists(&self, username: &str) -> Result<bool>;
    fn card_in_use(&self, card: i64) -> Result<bool>;
    fn code_exists(&self, code: i64) -> Result<bool>;
    fn serial_in_use(&self, serial: i64) -> Result<bool>;

    fn customer_id(&self, username: &str) -> Result<RowId>;
    fn customer_active(&self, username: &str) -> Result<bool>;

    fn article_id(&self, code: i64) -> Result<RowId>;
    fn article_price(&self, code: i64) -> Result<f64>;
    fn article_available(&self, code: i64) -> Result<bool>;

    fn list_customers(&self) -> Result<Vec<Customer>>;
    fn list_articles(&self) -> Result<Vec<Article>>;
    fn list_guides(&self) -> Result<Vec<ShippingGuide>>;
}
