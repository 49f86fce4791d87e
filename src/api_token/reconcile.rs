/// Permission set reconciliation
///
/// Moves a token's stored permissions to a requested set with the fewest
/// writes. Permissions are identified by `action`; a token holds at most one
/// permission per action.

use std::collections::{BTreeSet, HashMap};

use crate::api_token::model::Permission;

/// Writes needed to reach the requested permission set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionDiff {
    /// Requested actions with no stored permission
    pub to_create: BTreeSet<String>,
    /// Stored permissions whose action was not requested
    pub to_delete: Vec<Permission>,
}

impl PermissionDiff {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Keyed set difference between `current` and `desired`.
///
/// Actions present on both sides appear in neither output, so unchanged
/// grants are never deleted and recreated.
pub fn diff(current: &[Permission], desired: &BTreeSet<String>) -> PermissionDiff {
    let by_action: HashMap<&str, &Permission> = current
        .iter()
        .map(|permission| (permission.action.as_str(), permission))
        .collect();

    let to_create = desired
        .iter()
        .filter(|action| !by_action.contains_key(action.as_str()))
        .cloned()
        .collect();

    let mut to_delete: Vec<Permission> = current
        .iter()
        .filter(|permission| !desired.contains(&permission.action))
        .cloned()
        .collect();
    to_delete.sort_by(|a, b| a.action.cmp(&b.action));

    PermissionDiff {
        to_create,
        to_delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn stored(token_id: Uuid, actions: &[&str]) -> Vec<Permission> {
        actions
            .iter()
            .map(|action| Permission {
                id: Uuid::new_v4(),
                token_id,
                action: action.to_string(),
            })
            .collect()
    }

    fn set(actions: &[&str]) -> BTreeSet<String> {
        actions.iter().map(|a| a.to_string()).collect()
    }

    fn actions(permissions: &[Permission]) -> Vec<&str> {
        permissions.iter().map(|p| p.action.as_str()).collect()
    }

    #[test]
    fn test_replaces_only_changed_actions() {
        let current = stored(Uuid::new_v4(), &["a", "b"]);
        let result = diff(&current, &set(&["b", "c"]));

        assert_eq!(result.to_create, set(&["c"]));
        assert_eq!(actions(&result.to_delete), vec!["a"]);
        // The deleted row is the stored one, id included
        assert_eq!(result.to_delete[0].id, current[0].id);
    }

    #[test]
    fn test_same_set_is_a_no_op() {
        let current = stored(Uuid::new_v4(), &["read", "write", "admin"]);
        let desired: BTreeSet<String> = current.iter().map(|p| p.action.clone()).collect();

        let result = diff(&current, &desired);
        assert!(result.is_empty());
    }

    #[test]
    fn test_order_does_not_matter() {
        let token_id = Uuid::new_v4();
        let forward = stored(token_id, &["a", "b", "c"]);
        let mut backward = forward.clone();
        backward.reverse();

        let desired = set(&["c", "d"]);
        assert_eq!(diff(&forward, &desired), diff(&backward, &desired));
    }

    #[test]
    fn test_no_action_is_both_created_and_deleted() {
        let current = stored(Uuid::new_v4(), &["a", "b", "c", "d"]);
        let result = diff(&current, &set(&["c", "d", "e", "f"]));

        for permission in &result.to_delete {
            assert!(!result.to_create.contains(&permission.action));
        }
        assert_eq!(result.to_create, set(&["e", "f"]));
        assert_eq!(actions(&result.to_delete), vec!["a", "b"]);
    }

    #[test]
    fn test_from_empty_and_to_empty() {
        let current = stored(Uuid::new_v4(), &["a"]);

        let grow = diff(&[], &set(&["a", "b"]));
        assert_eq!(grow.to_create, set(&["a", "b"]));
        assert!(grow.to_delete.is_empty());

        let shrink = diff(&current, &BTreeSet::new());
        assert!(shrink.to_create.is_empty());
        assert_eq!(actions(&shrink.to_delete), vec!["a"]);
    }
}
