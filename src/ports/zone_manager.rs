use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A managed DNS zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
}

/// A record within a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub value: String,
}

/// Request body for record creation and update.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordInput {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub value: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ZoneError {
    #[error("zone not found")]
    ZoneNotFound,

    #[error("record not found")]
    RecordNotFound,

    #[error("zone already exists: {0}")]
    Conflict(String),

    #[error("invalid zone data: {0}")]
    Invalid(String),
}

pub type ZoneResult<T> = Result<T, ZoneError>;

/// ZoneManager defines the port behind the zone CRUD endpoints.
#[async_trait]
pub trait ZoneManager: Send + Sync + 'static {
    async fn list_zones(&self) -> Vec<Zone>;
    async fn create_zone(&self, name: &str) -> ZoneResult<Zone>;
    async fn delete_zone(&self, zone_id: Uuid) -> ZoneResult<()>;
    async fn list_records(&self, zone_id: Uuid) -> ZoneResult<Vec<ZoneRecord>>;
    async fn create_record(&self, zone_id: Uuid, input: RecordInput) -> ZoneResult<ZoneRecord>;
    async fn update_record(
        &self,
        zone_id: Uuid,
        record_id: Uuid,
        input: RecordInput,
    ) -> ZoneResult<ZoneRecord>;
    async fn delete_record(&self, zone_id: Uuid, record_id: Uuid) -> ZoneResult<()>;
}
