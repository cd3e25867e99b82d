//! Source → destination schema translation.
//!
//! `translate` is a pure function: no I/O, no clock, no randomness. Retrying a
//! push re-sends exactly the update the first attempt sent.
//!
//! Lossy fields: `last_modified` has no destination counterpart and is
//! dropped. `location_id` must resolve through the `LocationMap`; there is no
//! fallback warehouse.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::SyncError;
use crate::providers::{InventoryRecord, ListingUpdate};

/// Source `location_id` → destination `warehouse_ref`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationMap(HashMap<String, String>);

impl LocationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an inline mapping such as `L1=W1, L2=W2`.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (location, warehouse) = entry.split_once('=').ok_or_else(|| {
                    SyncError::Config(format!("location mapping '{entry}' is not LOCATION=WAREHOUSE"))
                })?;
                let (location, warehouse) = (location.trim(), warehouse.trim());
                if location.is_empty() || warehouse.is_empty() {
                    return Err(SyncError::Config(format!(
                        "location mapping '{entry}' has an empty side"
                    )));
                }
                Ok((location.to_owned(), warehouse.to_owned()))
            })
            .collect()
    }

    pub fn insert(&mut self, location_id: impl Into<String>, warehouse_ref: impl Into<String>) {
        self.0.insert(location_id.into(), warehouse_ref.into());
    }

    /// Add every entry of `other`, overriding existing locations.
    pub fn merge(&mut self, other: LocationMap) {
        self.0.extend(other.0);
    }

    pub fn get(&self, location_id: &str) -> Option<&str> {
        self.0.get(location_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LocationMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("no warehouse mapped for location '{location_id}' (sku {sku})")]
    UnmappedLocation { sku: String, location_id: String },
}

/// Map a source record onto the destination's listing update.
pub fn translate(
    record: &InventoryRecord,
    locations: &LocationMap,
) -> Result<ListingUpdate, TranslateError> {
    let warehouse_ref = locations
        .get(&record.location_id)
        .ok_or_else(|| TranslateError::UnmappedLocation {
            sku: record.sku.clone(),
            location_id: record.location_id.clone(),
        })?;

    Ok(ListingUpdate {
        external_id: record.sku.clone(),
        available_qty: record.quantity,
        warehouse_ref: warehouse_ref.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(sku: &str, quantity: u32, location_id: &str) -> InventoryRecord {
        InventoryRecord {
            sku: sku.into(),
            quantity,
            location_id: location_id.into(),
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn test_translate_maps_fields() {
        let locations: LocationMap = [("L1", "W1")].into_iter().collect();
        let update = translate(&record("A1", 5, "L1"), &locations).unwrap();

        assert_eq!(
            update,
            ListingUpdate {
                external_id: "A1".into(),
                available_qty: 5,
                warehouse_ref: "W1".into(),
            }
        );
    }

    #[test]
    fn test_translate_is_deterministic() {
        let locations: LocationMap = [("L1", "W1"), ("L2", "W2")].into_iter().collect();
        let input = record("SKU-9", 0, "L2");

        let first = translate(&input, &locations);
        for _ in 0..10 {
            assert_eq!(translate(&input, &locations), first);
        }
    }

    #[test]
    fn test_unmapped_iff_location_absent() {
        let locations: LocationMap = [("L1", "W1"), ("L2", "W2")].into_iter().collect();

        for location in ["L1", "L2", "L9", "", "l1"] {
            let result = translate(&record("X", 1, location), &locations);
            assert_eq!(result.is_err(), locations.get(location).is_none(), "{location}");
        }

        assert_eq!(
            translate(&record("A2", 0, "L9"), &locations),
            Err(TranslateError::UnmappedLocation {
                sku: "A2".into(),
                location_id: "L9".into(),
            })
        );
    }

    #[test]
    fn test_parse_inline_map() {
        let map = LocationMap::parse(" L1=W1, MOCK_WAREHOUSE_01 = TEMU-WH-7 ,").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("MOCK_WAREHOUSE_01"), Some("TEMU-WH-7"));

        assert!(LocationMap::parse("L1").is_err());
        assert!(LocationMap::parse("L1=").is_err());
        assert!(LocationMap::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_merge_overrides() {
        let mut base: LocationMap = [("L1", "W1"), ("L2", "W2")].into_iter().collect();
        base.merge([("L2", "W9")].into_iter().collect());
        assert_eq!(base.get("L2"), Some("W9"));
        assert_eq!(base.get("L1"), Some("W1"));
    }

    #[test]
    fn test_deserializes_from_json_object() {
        let map: LocationMap = serde_json::from_str(r#"{"L1":"W1"}"#).unwrap();
        assert_eq!(map.get("L1"), Some("W1"));
    }
}
