use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Fetch methods from highest to lowest priority. Fetches that finish work already on
/// screen (geometry, materials, images) come before fetches that start new view loads.
pub const METHOD_PRIORITY_ORDER: &[&str] = &[
    "getGeomMesh",
    "getMesh",
    "getMaterial",
    "getImage",
    "getAnnotation",
    "getViewAnimations",
    "getViewGroups",
    "getView",
    "getScene",
];

/// Priority assigned to methods missing from the table.
pub const UNKNOWN_METHOD_PRIORITY: u32 = 0;

static PRIORITIES: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    let count = METHOD_PRIORITY_ORDER.len() as u32;
    METHOD_PRIORITY_ORDER
        .iter()
        .enumerate()
        .map(|(idx, method)| (*method, count - idx as u32))
        .collect()
});

pub fn priority_for(method: &str) -> u32 {
    PRIORITIES
        .get(method)
        .copied()
        .unwrap_or(UNKNOWN_METHOD_PRIORITY)
}
