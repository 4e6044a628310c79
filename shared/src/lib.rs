use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

pub const ORDER_ADMITTED_EVENT: &str = "OrderAdmitted";

/// A flash-sale item. `count` is fixed once the sale starts; `sale` and
/// `version` only move through a committed decrement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub id: i32,
    pub name: String,
    pub count: i32,
    pub sale: i32,
    pub version: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i32,
    pub stock_id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
}

/// Payload of the outbox event written alongside every new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAdmitted {
    pub order_id: i32,
    pub stock_id: i32,
    pub name: String,
    pub sale: i32,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

impl StockItem {
    pub fn remaining(&self) -> i32 {
        self.count - self.sale
    }

    pub fn is_sold_out(&self) -> bool {
        self.sale >= self.count
    }

    /// The item as it looks after one more unit is sold.
    pub fn sold_one(&self) -> Self {
        Self {
            sale: self.sale + 1,
            version: self.version + 1,
            ..self.clone()
        }
    }
}

impl OrderAdmitted {
    pub fn new(order_id: i32, item: &StockItem, created_at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            stock_id: item.id,
            name: item.name.clone(),
            sale: item.sale,
            version: item.version,
            created_at,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
