//! Grouping of scanned rows.

use std::collections::HashMap;

use crate::registry::MonitoredField;
use crate::store::{is_blank, FieldEntry, RecordIdentity, RowId};

/// Rows of one identity that hold the same value.
///
/// Revisions of a record normally agree on the value, so a repair rewrites
/// the whole group at once.
#[derive(Debug, Clone)]
pub(crate) struct RowGroup {
    pub identity: RecordIdentity,
    pub value: Option<String>,
    pub rows: Vec<RowId>,
}

impl RowGroup {
    pub fn is_empty(&self) -> bool {
        is_blank(self.value.as_deref())
    }
}

/// A value held by several distinct identities.
#[derive(Debug, Clone)]
pub(crate) struct DuplicateSet {
    pub value: String,
    /// Indexes into [`FieldScan::groups`], one per identity, first seen first.
    pub members: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct FieldScan {
    pub rows: usize,
    pub groups: Vec<RowGroup>,
}

impl FieldScan {
    /// Group entries by (identity, value), keeping first-seen order.
    pub fn from_entries(entries: Vec<FieldEntry>) -> Self {
        let rows = entries.len();
        let mut groups: Vec<RowGroup> = Vec::new();
        let mut index: HashMap<(RecordIdentity, Option<String>), usize> = HashMap::new();

        for entry in entries {
            let key = (entry.identity.clone(), entry.value.clone());
            match index.get(&key) {
                Some(&i) => groups[i].rows.push(entry.row_id),
                None => {
                    index.insert(key, groups.len());
                    groups.push(RowGroup {
                        identity: entry.identity,
                        value: entry.value,
                        rows: vec![entry.row_id],
                    });
                }
            }
        }

        Self { rows, groups }
    }

    pub fn empty_count(&self) -> usize {
        self.groups.iter().filter(|g| g.is_empty()).count()
    }

    pub fn invalid_count(&self, field: &MonitoredField) -> usize {
        self.groups
            .iter()
            .filter(|g| g.value.as_deref().is_some_and(|v| !is_blank(Some(v)) && !field.is_valid(v)))
            .count()
    }

    /// Values shared by two or more distinct identities, ordered by first
    /// appearance. Groups for which `skip` returns true are ignored.
    pub fn duplicate_sets(&self, skip: impl Fn(usize) -> bool) -> Vec<DuplicateSet> {
        let mut sets: Vec<DuplicateSet> = Vec::new();
        let mut by_value: HashMap<&str, usize> = HashMap::new();

        for (i, group) in self.groups.iter().enumerate() {
            if group.is_empty() || skip(i) {
                continue;
            }
            let Some(value) = group.value.as_deref() else {
                continue;
            };
            match by_value.get(value) {
                Some(&s) => sets[s].members.push(i),
                None => {
                    by_value.insert(value, sets.len());
                    sets.push(DuplicateSet {
                        value: value.to_string(),
                        members: vec![i],
                    });
                }
            }
        }

        // Groups are unique per (identity, value), so members of one set are
        // already distinct identities.
        sets.retain(|s| s.members.len() >= 2);
        sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(row: u64, identity: &str, value: Option<&str>) -> FieldEntry {
        FieldEntry {
            row_id: RowId(row),
            identity: identity.into(),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_revisions_collapse() {
        let scan = FieldScan::from_entries(vec![
            entry(1, "a", Some("v")),
            entry(2, "a", Some("v")),
            entry(3, "b", Some("w")),
        ]);

        assert_eq!(scan.rows, 3);
        assert_eq!(scan.groups.len(), 2);
        assert_eq!(scan.groups[0].rows, vec![RowId(1), RowId(2)]);
        assert!(scan.duplicate_sets(|_| false).is_empty());
    }

    #[test]
    fn test_duplicates_across_identities() {
        let scan = FieldScan::from_entries(vec![
            entry(1, "a", Some("v")),
            entry(2, "b", Some("v")),
            entry(3, "a", Some("v")),
            entry(4, "c", Some("v")),
            entry(5, "d", None),
            entry(6, "e", Some(" ")),
        ]);

        let sets = scan.duplicate_sets(|_| false);
        assert_eq!(sets.len(), 1);
        let identities: Vec<_> = sets[0]
            .members
            .iter()
            .map(|&i| scan.groups[i].identity.as_str())
            .collect();
        assert_eq!(identities, vec!["a", "b", "c"]);
        assert_eq!(scan.empty_count(), 2);
    }

    #[test]
    fn test_invalid_count_ignores_blank() {
        let field = MonitoredField::new("t", "uuid");
        let scan = FieldScan::from_entries(vec![
            entry(1, "a", Some("junk")),
            entry(2, "b", Some("")),
            entry(3, "c", Some("3f2b8c1e-9d4a-4b7e-8c21-5a6f0e9d1b23")),
        ]);
        assert_eq!(scan.invalid_count(&field), 1);
    }
}
