//! Group content relation map.
//!
//! Derived from the audience fields of every non-user bundle. Maps each group
//! bundle to the content bundles that can reference it.

use std::collections::BTreeMap;

use og_common::{BundleMap, USER_ENTITY_TYPE};

use crate::storage::{EntityStore, ReferenceFieldIndex, StorageError};

/// Group type → group bundle → content type → content bundles.
pub type RelationMap = BTreeMap<String, BTreeMap<String, BundleMap>>;

/// Scan every bundle's audience fields against the registered groups.
///
/// A field without a target bundle restriction relates its bundle to every
/// group bundle of the target type. Fields pointing at types or bundles that
/// are not groups are ignored.
pub fn build(
    groups: &BundleMap,
    entities: &dyn EntityStore,
    fields: &dyn ReferenceFieldIndex,
) -> Result<RelationMap, StorageError> {
    let mut map = RelationMap::new();

    for content_type in entities.entity_types()? {
        if content_type == USER_ENTITY_TYPE {
            continue;
        }
        for content_bundle in entities.bundles(&content_type)? {
            for field in fields.audience_fields(&content_type, &content_bundle)? {
                let Some(group_bundles) = groups.get(&field.target_type) else {
                    continue;
                };
                for group_bundle in group_bundles.iter().filter(|b| field.targets_bundle(b)) {
                    map.entry(field.target_type.clone())
                        .or_default()
                        .entry(group_bundle.clone())
                        .or_default()
                        .entry(content_type.clone())
                        .or_default()
                        .insert(content_bundle.clone());
                }
            }
        }
    }

    Ok(map)
}

/// Group bundles a content bundle can reference.
pub fn group_bundles_of(map: &RelationMap, content_type: &str, content_bundle: &str) -> BundleMap {
    let mut result = BundleMap::new();
    for (group_type, bundles) in map {
        for (group_bundle, content) in bundles {
            if content
                .get(content_type)
                .is_some_and(|set| set.contains(content_bundle))
            {
                result
                    .entry(group_type.clone())
                    .or_default()
                    .insert(group_bundle.clone());
            }
        }
    }
    result
}

/// Content bundles that can reference a group bundle.
pub fn content_bundles_of(map: &RelationMap, group_type: &str, group_bundle: &str) -> BundleMap {
    map.get(group_type)
        .and_then(|bundles| bundles.get(group_bundle))
        .cloned()
        .unwrap_or_default()
}
