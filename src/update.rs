//! Update Planner (C7): decides whether a computed diff can be applied at
//! all, before anything touches the cluster (§4.7).

use crate::diff::UpdateResult;
use crate::error::Error;

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub dry_run: bool,
}

/// `PrepareUpdate`: a pure decision function over an already-computed diff.
///
/// - A prior error short-circuits: `(None, false, Some(err))`.
/// - Dry-run never applies anything, regardless of what the diff contains:
///   `(Some(diff), false, None)`.
/// - A diff with any `RecreateRequired` change aborts before any provisioner
///   call, surfacing [`Error::RecreateRequired`] with the offending fields.
/// - Otherwise the caller may proceed: `(Some(diff), true, None)`, and is
///   responsible for applying in-place changes and populating
///   `applied_changes`/`failed_changes` on the returned diff.
pub fn prepare_update(
    diff: UpdateResult,
    prior_error: Option<Error>,
    opts: UpdateOptions,
) -> (Option<UpdateResult>, bool, Option<Error>) {
    if let Some(err) = prior_error {
        return (None, false, Some(err));
    }

    if opts.dry_run {
        return (Some(diff), false, None);
    }

    if diff.has_recreate_required() {
        let fields = diff
            .changes
            .iter()
            .filter(|c| c.category == crate::diff::ChangeCategory::RecreateRequired)
            .map(|c| c.field.clone())
            .collect();
        return (Some(diff), false, Some(Error::RecreateRequired { fields }));
    }

    (Some(diff), true, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{Change, ChangeCategory};

    fn in_place_change() -> Change {
        Change {
            field: "cni".to_string(),
            old: "Bundled".to_string(),
            new: "Cilium".to_string(),
            category: ChangeCategory::InPlace,
            reason: "test".to_string(),
        }
    }

    fn recreate_change() -> Change {
        Change {
            field: "distribution".to_string(),
            old: "Vanilla".to_string(),
            new: "Talos".to_string(),
            category: ChangeCategory::RecreateRequired,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn prior_error_short_circuits() {
        let diff = UpdateResult { changes: vec![in_place_change()], ..Default::default() };
        let (result, should_continue, err) =
            prepare_update(diff, Some(Error::ConfigInvalid("boom".to_string())), UpdateOptions::default());
        assert!(result.is_none());
        assert!(!should_continue);
        assert!(err.is_some());
    }

    #[test]
    fn dry_run_never_continues() {
        let diff = UpdateResult { changes: vec![in_place_change()], ..Default::default() };
        let (result, should_continue, err) =
            prepare_update(diff, None, UpdateOptions { dry_run: true });
        assert!(result.is_some());
        assert!(!should_continue);
        assert!(err.is_none());
    }

    #[test]
    fn recreate_required_aborts_with_zero_provisioner_calls() {
        let diff = UpdateResult { changes: vec![recreate_change()], ..Default::default() };
        let (result, should_continue, err) = prepare_update(diff, None, UpdateOptions::default());
        assert!(result.is_some());
        assert!(!should_continue);
        assert!(matches!(err, Some(Error::RecreateRequired { .. })));
    }

    #[test]
    fn in_place_only_continues() {
        let diff = UpdateResult { changes: vec![in_place_change()], ..Default::default() };
        let (result, should_continue, err) = prepare_update(diff, None, UpdateOptions::default());
        assert!(result.is_some());
        assert!(should_continue);
        assert!(err.is_none());
    }
}
