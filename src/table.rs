use chrono::{DateTime, Local};
use std::collections::HashSet;

use crate::model::{
    NamespaceScope, ResourceKind, ResourceRow, RowAction, RowEvent, TableData, namespaced,
};

/// Classifies `fresh` against the previous snapshot and builds the next one.
///
/// Rows outside `scope` are filtered out before the diff. Rows reported as
/// `Delete` in `previous` count as absent, so a deletion is reported once and
/// then dropped.
pub fn build_table(
    kind: ResourceKind,
    scope: &NamespaceScope,
    previous: Option<&TableData>,
    fresh: Vec<ResourceRow>,
    refreshed_at: DateTime<Local>,
) -> TableData {
    let mut table = TableData::for_kind(kind, scope);
    table.refreshed_at = Some(refreshed_at);

    let mut seen = HashSet::with_capacity(fresh.len());
    for row in fresh {
        if !in_scope(kind, scope, &row.fqn) {
            continue;
        }
        let prior = previous
            .and_then(|previous| previous.get(&row.fqn))
            .filter(|prior| prior.action != RowAction::Delete);
        let event = match prior {
            None => RowEvent::new_row(row),
            Some(prior) => classify(prior, row),
        };
        let fqn = event.fqn.clone();
        if table.push(event) {
            seen.insert(fqn);
        }
    }

    let Some(previous) = previous else {
        return table;
    };
    for prior in previous.rows() {
        if prior.action == RowAction::Delete || seen.contains(&prior.fqn) {
            continue;
        }
        table.push(RowEvent {
            fqn: prior.fqn.clone(),
            action: RowAction::Delete,
            fields: prior.fields.clone(),
            deltas: vec![None; prior.fields.len()],
        });
    }

    table
}

fn classify(prior: &RowEvent, row: ResourceRow) -> RowEvent {
    let deltas = row
        .fields
        .iter()
        .enumerate()
        .map(|(index, field)| match prior.fields.get(index) {
            Some(old) if old == field => None,
            Some(old) => Some(old.clone()),
            None => Some(String::new()),
        })
        .collect::<Vec<_>>();
    let changed = deltas.iter().any(Option::is_some) || prior.fields.len() != row.fields.len();

    RowEvent {
        fqn: row.fqn,
        action: if changed {
            RowAction::Update
        } else {
            RowAction::Unchanged
        },
        fields: row.fields,
        deltas,
    }
}

fn in_scope(kind: ResourceKind, scope: &NamespaceScope, fqn: &str) -> bool {
    if !kind.namespaced() {
        return true;
    }
    let (namespace, _) = namespaced(fqn);
    scope.contains(namespace)
}

#[cfg(test)]
mod tests {
    use super::build_table;
    use crate::model::{NamespaceScope, ResourceKind, ResourceRow, RowAction};
    use chrono::Local;

    fn pod(namespace: &str, name: &str, status: &str, restarts: &str) -> ResourceRow {
        ResourceRow::new(
            format!("{namespace}/{name}"),
            vec![
                namespace.to_string(),
                name.to_string(),
                "1/1".to_string(),
                status.to_string(),
                restarts.to_string(),
                "10.0.0.1".to_string(),
                "node-a".to_string(),
                "5m".to_string(),
            ],
        )
    }

    #[test]
    fn first_snapshot_marks_everything_new() {
        let table = build_table(
            ResourceKind::Pods,
            &NamespaceScope::All,
            None,
            vec![pod("ns", "a", "Running", "0"), pod("ns", "b", "Running", "0")],
            Local::now(),
        );
        assert_eq!(table.len(), 2);
        assert!(table.rows().iter().all(|row| row.action == RowAction::New));
        assert!(table.rows().iter().all(|row| row.changed_indices().is_empty()));
    }

    #[test]
    fn second_snapshot_classifies_each_row() {
        let scope = NamespaceScope::All;
        let first = build_table(
            ResourceKind::Pods,
            &scope,
            None,
            vec![
                pod("ns", "same", "Running", "0"),
                pod("ns", "changed", "Running", "0"),
                pod("ns", "gone", "Running", "0"),
            ],
            Local::now(),
        );
        let second = build_table(
            ResourceKind::Pods,
            &scope,
            Some(&first),
            vec![
                pod("ns", "same", "Running", "0"),
                pod("ns", "changed", "CrashLoopBackOff", "3"),
                pod("ns", "fresh", "Pending", "0"),
            ],
            Local::now(),
        );

        assert_eq!(second.get("ns/same").map(|r| r.action), Some(RowAction::Unchanged));
        assert_eq!(second.get("ns/fresh").map(|r| r.action), Some(RowAction::New));
        assert_eq!(second.get("ns/gone").map(|r| r.action), Some(RowAction::Delete));

        let changed = second.get("ns/changed").expect("changed row");
        assert_eq!(changed.action, RowAction::Update);
        assert_eq!(changed.changed_indices(), vec![3, 4]);
        assert_eq!(changed.deltas[3].as_deref(), Some("Running"));
        assert_eq!(changed.deltas[4].as_deref(), Some("0"));
    }

    #[test]
    fn deleted_rows_are_reported_once_then_dropped() {
        let scope = NamespaceScope::Named("ns".to_string());
        let first = build_table(
            ResourceKind::Pods,
            &scope,
            None,
            vec![pod("ns", "pod", "Running", "0")],
            Local::now(),
        );
        let second = build_table(ResourceKind::Pods, &scope, Some(&first), Vec::new(), Local::now());
        let deleted = second.get("ns/pod").expect("delete event");
        assert_eq!(deleted.action, RowAction::Delete);
        assert_eq!(deleted.field(3), "Running");

        let third = build_table(ResourceKind::Pods, &scope, Some(&second), Vec::new(), Local::now());
        assert!(!third.contains("ns/pod"));
        assert!(third.is_empty());
    }

    #[test]
    fn row_returning_after_delete_is_new() {
        let scope = NamespaceScope::All;
        let first = build_table(
            ResourceKind::Pods,
            &scope,
            None,
            vec![pod("ns", "pod", "Running", "0")],
            Local::now(),
        );
        let second = build_table(ResourceKind::Pods, &scope, Some(&first), Vec::new(), Local::now());
        let third = build_table(
            ResourceKind::Pods,
            &scope,
            Some(&second),
            vec![pod("ns", "pod", "Running", "0")],
            Local::now(),
        );
        assert_eq!(third.get("ns/pod").map(|r| r.action), Some(RowAction::New));
    }

    #[test]
    fn namespace_filter_applies_before_diff() {
        let scope = NamespaceScope::Named("ns".to_string());
        let table = build_table(
            ResourceKind::Pods,
            &scope,
            None,
            vec![pod("ns", "a", "Running", "0"), pod("other", "b", "Running", "0")],
            Local::now(),
        );
        assert_eq!(table.len(), 1);
        assert!(table.contains("ns/a"));
        assert_eq!(table.namespace, "ns");
    }
}
