use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use shared::*;
use crate::store::PendingEvent;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::stock)]
pub struct DbStock {
    pub id: i32,
    pub name: String,
    pub count: i32,
    pub sale: i32,
    pub version: i32,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::users)]
pub struct DbUser {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub stock_id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: i32,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: i32,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl From<DbStock> for StockItem {
    fn from(row: DbStock) -> Self {
        Self {
            id: row.id,
            name: row.name,
            count: row.count,
            sale: row.sale,
            version: row.version,
        }
    }
}

impl From<DbUser> for User {
    fn from(row: DbUser) -> Self {
        Self { id: row.id, name: row.name }
    }
}

impl From<DbOutboxEvent> for PendingEvent {
    fn from(row: DbOutboxEvent) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.event_data,
        }
    }
}

impl NewOutboxEvent {
    pub fn order_admitted(event: &OrderAdmitted) -> serde_json::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.stock_id,
            event_type: ORDER_ADMITTED_EVENT.to_string(),
            event_data: event.to_json()?,
        })
    }
}
