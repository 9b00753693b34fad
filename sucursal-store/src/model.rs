use sucursal_base::{BranchId, RowId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CustomerStatus {
    Active,
    Inactive,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "Active",
            CustomerStatus::Inactive => "Inactive",
        }
    }

    pub fn parse(s: &str) -> Option<CustomerStatus> {
        match s {
            "Active" => Some(CustomerStatus::Active),
            "Inactive" => Some(CustomerStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Customer {
    pub id: RowId,
    pub username: String,
    pub name: String,
    pub address: String,
    pub card: i64,
    pub status: CustomerStatus,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArticleStock {
    Available,
    OutOfStock,
}

impl ArticleStock {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStock::Available => "Available",
            ArticleStock::OutOfStock => "OutOfStock",
        }
    }

    pub fn parse(s: &str) -> Option<ArticleStock> {
        match s {
            "Available" => Some(ArticleStock::Available),
            "OutOfStock" => Some(ArticleStock::OutOfStock),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Article {
    pub id: RowId,
    pub branch_id: BranchId,
    pub code: i64,
    pub name: String,
    pub price: f64,
    pub stock: ArticleStock,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShippingGuide {
    pub id: RowId,
    pub customer_id: RowId,
    pub article_id: RowId,
    pub branch_id: BranchId,
    pub serial: i64,
    pub amount: f64,
    pub purchase_ts: String,
}
