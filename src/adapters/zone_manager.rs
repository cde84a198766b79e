use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ports::zone_manager::{
    RecordInput, Zone, ZoneError, ZoneManager, ZoneRecord, ZoneResult,
};

struct ZoneState {
    zone: Zone,
    records: BTreeMap<Uuid, ZoneRecord>,
}

/// Zone bookkeeping held in memory; nothing is served over DNS.
#[derive(Default)]
pub struct InMemoryZoneManager {
    zones: RwLock<BTreeMap<Uuid, ZoneState>>,
}

impl InMemoryZoneManager {
    pub fn new() -> Self {
        Self::default()
    }
}

fn validate_name(name: &str) -> ZoneResult<String> {
    let name = name.trim().trim_end_matches('.').to_ascii_lowercase();
    if name.is_empty() || name.len() > 253 || name.split('.').any(|label| label.is_empty()) {
        return Err(ZoneError::Invalid(format!("invalid name '{name}'")));
    }
    Ok(name)
}

fn validate_record(input: &RecordInput) -> ZoneResult<()> {
    if input.name.trim().is_empty() {
        return Err(ZoneError::Invalid("record name must not be empty".to_string()));
    }
    if input.value.trim().is_empty() {
        return Err(ZoneError::Invalid("record value must not be empty".to_string()));
    }
    Ok(())
}

#[async_trait]
impl ZoneManager for InMemoryZoneManager {
    async fn list_zones(&self) -> Vec<Zone> {
        let zones = self.zones.read().await;
        let mut list: Vec<Zone> = zones.values().map(|state| state.zone.clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    async fn create_zone(&self, name: &str) -> ZoneResult<Zone> {
        let name = validate_name(name)?;
        let mut zones = self.zones.write().await;
        if zones
            .values()
            .any(|state| state.zone.name == name)
        {
            return Err(ZoneError::Conflict(name));
        }
        let zone = Zone {
            id: Uuid::new_v4(),
            name,
        };
        zones.insert(
            zone.id,
            ZoneState {
                zone: zone.clone(),
                records: BTreeMap::new(),
            },
        );
        tracing::info!(zone.id = %zone.id, zone.name = %zone.name, "Zone created");
        Ok(zone)
    }

    async fn delete_zone(&self, zone_id: Uuid) -> ZoneResult<()> {
        self.zones
            .write()
            .await
            .remove(&zone_id)
            .map(|_| ())
            .ok_or(ZoneError::ZoneNotFound)
    }

    async fn list_records(&self, zone_id: Uuid) -> ZoneResult<Vec<ZoneRecord>> {
        let zones = self.zones.read().await;
        let state = zones.get(&zone_id).ok_or(ZoneError::ZoneNotFound)?;
        Ok(state.records.values().cloned().collect())
    }

    async fn create_record(&self, zone_id: Uuid, input: RecordInput) -> ZoneResult<ZoneRecord> {
        validate_record(&input)?;
        let mut zones = self.zones.write().await;
        let state = zones.get_mut(&zone_id).ok_or(ZoneError::ZoneNotFound)?;
        let record = ZoneRecord {
            id: Uuid::new_v4(),
            name: input.name,
            record_type: input.record_type,
            value: input.value,
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_record(
        &self,
        zone_id: Uuid,
        record_id: Uuid,
        input: RecordInput,
    ) -> ZoneResult<ZoneRecord> {
        validate_record(&input)?;
        let mut zones = self.zones.write().await;
        let state = zones.get_mut(&zone_id).ok_or(ZoneError::ZoneNotFound)?;
        let record = state
            .records
            .get_mut(&record_id)
            .ok_or(ZoneError::RecordNotFound)?;
        record.name = input.name;
        record.record_type = input.record_type;
        record.value = input.value;
        Ok(record.clone())
    }

    async fn delete_record(&self, zone_id: Uuid, record_id: Uuid) -> ZoneResult<()> {
        let mut zones = self.zones.write().await;
        let state = zones.get_mut(&zone_id).ok_or(ZoneError::ZoneNotFound)?;
        state
            .records
            .remove(&record_id)
            .map(|_| ())
            .ok_or(ZoneError::RecordNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::zone_manager::RecordType;

    fn input(name: &str, value: &str) -> RecordInput {
        RecordInput {
            name: name.to_string(),
            record_type: RecordType::A,
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn test_zone_lifecycle() {
        let manager = InMemoryZoneManager::new();
        let zone = manager.create_zone("Example.com.").await.unwrap();
        assert_eq!(zone.name, "example.com");
        assert_eq!(
            manager.create_zone("example.com").await,
            Err(ZoneError::Conflict("example.com".to_string()))
        );

        let record = manager
            .create_record(zone.id, input("www", "10.0.0.1"))
            .await
            .unwrap();
        let updated = manager
            .update_record(zone.id, record.id, input("www", "10.0.0.2"))
            .await
            .unwrap();
        assert_eq!(updated.value, "10.0.0.2");
        assert_eq!(manager.list_records(zone.id).await.unwrap(), vec![updated]);

        manager.delete_record(zone.id, record.id).await.unwrap();
        assert_eq!(
            manager.delete_record(zone.id, record.id).await,
            Err(ZoneError::RecordNotFound)
        );

        manager.delete_zone(zone.id).await.unwrap();
        assert!(manager.list_zones().await.is_empty());
        assert_eq!(
            manager.list_records(zone.id).await,
            Err(ZoneError::ZoneNotFound)
        );
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let manager = InMemoryZoneManager::new();
        assert!(matches!(manager.create_zone("  ").await, Err(ZoneError::Invalid(_))));
        assert!(matches!(
            manager.create_zone("a..b").await,
            Err(ZoneError::Invalid(_))
        ));

        let zone = manager.create_zone("example.org").await.unwrap();
        assert!(matches!(
            manager.create_record(zone.id, input("", "x")).await,
            Err(ZoneError::Invalid(_))
        ));
        assert_eq!(
            manager.create_record(Uuid::new_v4(), input("a", "b")).await,
            Err(ZoneError::ZoneNotFound)
        );
    }
}
