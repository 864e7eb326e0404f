use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::models::EntityId;
use crate::store::Keyed;

/// How a fetched list is folded into what the client already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Union: keep local entries, overwrite matching ids in place, append new ones.
    #[default]
    Merge,
    /// Fetched list wins; only still-pending local creations survive.
    Replace,
}

impl std::str::FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "merge" => Ok(FetchMode::Merge),
            "replace" => Ok(FetchMode::Replace),
            other => Err(format!("Unknown fetch mode '{}'. Available: merge, replace", other)),
        }
    }
}

fn survives<T: Keyed>(item: &T, is_live_temp: &impl Fn(u64) -> bool, deleted: &HashSet<i64>) -> bool {
    match item.key() {
        EntityId::Pending(temp) => is_live_temp(temp),
        EntityId::Confirmed(id) => !deleted.contains(&id),
    }
}

/// Fold `fetched` into `existing`.
///
/// Existing entries keep their position. Temporary entries survive only while
/// their creation is still pending; confirmed-deleted ids are never kept or
/// re-inserted. A fetched entity overwrites the entry with the same id, or is
/// appended.
pub fn merge_fetch_results<T: Keyed + Clone>(
    existing: &[T],
    fetched: Vec<T>,
    is_live_temp: impl Fn(u64) -> bool,
    deleted: &HashSet<i64>,
) -> Vec<T> {
    let mut result: Vec<T> = existing
        .iter()
        .filter(|item| survives(*item, &is_live_temp, deleted))
        .cloned()
        .collect();

    for item in fetched {
        if let EntityId::Confirmed(id) = item.key() {
            if deleted.contains(&id) {
                continue;
            }
        }
        match result.iter_mut().find(|slot| slot.key() == item.key()) {
            Some(slot) => *slot = item,
            None => result.push(item),
        }
    }
    result
}

/// The fetched list replaces the confirmed entries; live temporary entries
/// are kept in front so a pending creation is not lost.
pub fn replace_with_fetch<T: Keyed + Clone>(
    existing: &[T],
    fetched: Vec<T>,
    is_live_temp: impl Fn(u64) -> bool,
    deleted: &HashSet<i64>,
) -> Vec<T> {
    let mut result: Vec<T> = existing
        .iter()
        .filter(|item| matches!(item.key(), EntityId::Pending(temp) if is_live_temp(temp)))
        .cloned()
        .collect();
    let mut seen: HashSet<EntityId> = HashSet::new();
    for item in fetched {
        if survives(&item, &is_live_temp, deleted) && seen.insert(item.key()) {
            result.push(item);
        }
    }
    result
}

pub fn fold_fetch<T: Keyed + Clone>(
    mode: FetchMode,
    existing: &[T],
    fetched: Vec<T>,
    is_live_temp: impl Fn(u64) -> bool,
    deleted: &HashSet<i64>,
) -> Vec<T> {
    match mode {
        FetchMode::Merge => merge_fetch_results(existing, fetched, is_live_temp, deleted),
        FetchMode::Replace => replace_with_fetch(existing, fetched, is_live_temp, deleted),
    }
}

/// List endpoints answer either with a bare array or with the array wrapped
/// under `field`. Anything else is treated as an empty list.
pub fn normalize_fetch_payload(raw: Value, field: &str) -> Vec<Value> {
    match raw {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(field) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Single-entity payloads come bare or wrapped as `{ field: {...} }`.
pub fn unwrap_entity(raw: Value, field: &str) -> Value {
    match raw {
        Value::Object(mut map) if matches!(map.get(field), Some(Value::Object(_))) => {
            map.remove(field).unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Company, NewCompany};
    use proptest::prelude::*;
    use serde_json::json;

    fn company(id: EntityId, name: &str) -> Company {
        Company::provisional(id, &NewCompany { name: name.to_string(), webpage: None })
    }

    fn ids(items: &[Company]) -> Vec<EntityId> {
        items.iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_merge_keeps_pending_updates_in_place_appends_new() {
        let existing = vec![
            company(EntityId::Pending(1), "temp"),
            company(EntityId::Confirmed(5), "X"),
        ];
        let fetched = vec![
            company(EntityId::Confirmed(5), "X-updated"),
            company(EntityId::Confirmed(6), "B"),
        ];

        let merged = merge_fetch_results(&existing, fetched, |temp| temp == 1, &HashSet::new());

        assert_eq!(
            ids(&merged),
            vec![EntityId::Pending(1), EntityId::Confirmed(5), EntityId::Confirmed(6)]
        );
        assert_eq!(merged[1].name, "X-updated");
    }

    #[test]
    fn test_merge_drops_superseded_temp() {
        let existing = vec![company(EntityId::Pending(1), "temp")];
        let merged = merge_fetch_results(&existing, vec![], |_| false, &HashSet::new());
        assert!(merged.is_empty());
    }

    #[test]
    fn test_merge_never_reinserts_deleted() {
        let existing = vec![company(EntityId::Confirmed(5), "X")];
        let fetched = vec![company(EntityId::Confirmed(5), "X"), company(EntityId::Confirmed(6), "B")];
        let deleted: HashSet<i64> = [5].into_iter().collect();

        let merged = merge_fetch_results(&existing, fetched, |_| true, &deleted);
        assert_eq!(ids(&merged), vec![EntityId::Confirmed(6)]);
    }

    #[test]
    fn test_merge_keeps_local_confirmed_absent_from_fetch() {
        let existing = vec![company(EntityId::Confirmed(4), "Local")];
        let merged = merge_fetch_results(
            &existing,
            vec![company(EntityId::Confirmed(6), "B")],
            |_| true,
            &HashSet::new(),
        );
        assert_eq!(ids(&merged), vec![EntityId::Confirmed(4), EntityId::Confirmed(6)]);
    }

    #[test]
    fn test_replace_mode_keeps_only_live_temps() {
        let existing = vec![
            company(EntityId::Confirmed(4), "Gone upstream"),
            company(EntityId::Pending(2), "temp"),
        ];
        let fetched = vec![company(EntityId::Confirmed(6), "B")];
        let result = fold_fetch(FetchMode::Replace, &existing, fetched, |t| t == 2, &HashSet::new());
        assert_eq!(ids(&result), vec![EntityId::Pending(2), EntityId::Confirmed(6)]);
    }

    #[test]
    fn test_normalize_bare_list() {
        let items = normalize_fetch_payload(json!([{"id": 1}, {"id": 2}]), "applications");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_normalize_wrapped_list() {
        let items = normalize_fetch_payload(json!({"applications": [{"id": 1}]}), "applications");
        assert_eq!(items, vec![json!({"id": 1})]);
    }

    #[test]
    fn test_normalize_wrong_field_or_shape_is_empty() {
        assert!(normalize_fetch_payload(json!({"companies": [{"id": 1}]}), "applications").is_empty());
        assert!(normalize_fetch_payload(json!({"applications": {"id": 1}}), "applications").is_empty());
        assert!(normalize_fetch_payload(json!("nope"), "applications").is_empty());
        assert!(normalize_fetch_payload(Value::Null, "applications").is_empty());
    }

    #[test]
    fn test_unwrap_entity() {
        assert_eq!(unwrap_entity(json!({"company": {"id": 1}}), "company"), json!({"id": 1}));
        assert_eq!(
            unwrap_entity(json!({"id": 1, "name": "A"}), "company"),
            json!({"id": 1, "name": "A"})
        );
    }

    #[test]
    fn test_fetch_mode_parse() {
        assert_eq!("Replace".parse::<FetchMode>(), Ok(FetchMode::Replace));
        assert!("sometimes".parse::<FetchMode>().is_err());
    }

    proptest! {
        #[test]
        fn prop_merge_never_duplicates_ids(
            existing_ids in proptest::collection::hash_set(1i64..40, 0..15),
            fetched_ids in proptest::collection::vec(1i64..40, 0..20),
            temps in proptest::collection::hash_set(1u64..5, 0..4),
        ) {
            let mut existing: Vec<Company> = temps
                .iter()
                .map(|t| company(EntityId::Pending(*t), "temp"))
                .collect();
            existing.extend(existing_ids.iter().map(|id| company(EntityId::Confirmed(*id), "old")));
            let fetched: Vec<Company> = fetched_ids
                .iter()
                .map(|id| company(EntityId::Confirmed(*id), "new"))
                .collect();

            let merged = merge_fetch_results(&existing, fetched, |_| true, &HashSet::new());

            let unique: HashSet<EntityId> = merged.iter().map(|c| c.id).collect();
            prop_assert_eq!(unique.len(), merged.len());
            for t in &temps {
                prop_assert!(unique.contains(&EntityId::Pending(*t)));
            }
            for id in &fetched_ids {
                prop_assert!(unique.contains(&EntityId::Confirmed(*id)));
            }
        }
    }
}
