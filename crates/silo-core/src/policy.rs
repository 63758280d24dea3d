//! Validation policy — the pure decision function behind the dual-path
//! command gateway.
//!
//! Given an operation, its subject family, and the acting user's workspace
//! role, the policy decides whether the intent must pass through the global
//! validator (`requested` phase) or may be released directly (`validated`
//! phase). Every decision carries a human-readable reason and the rule that
//! fired, both of which end up in the event's metadata for audit.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Result,
  event::{Action, Family},
  role::WorkspaceRole,
};

// ─── Decision ────────────────────────────────────────────────────────────────

/// Which rule produced a [`PolicyDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicySource {
  /// Admins and owners bypass validation.
  RoleOverride,
  /// The family/operation's built-in default.
  SubjectTypeDefault,
  /// A guarded operation configured on the workspace.
  WorkspaceConfig,
}

/// The outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
  pub requires_validation: bool,
  /// Human-readable justification, recorded in event metadata.
  pub reason:              String,
  pub source:              PolicySource,
}

// ─── Input ───────────────────────────────────────────────────────────────────

/// Everything the policy may consider. `project_id` is carried for
/// project-scoped rules; the default rule set does not key on it.
#[derive(Debug, Clone)]
pub struct PolicyInput {
  pub operation:    Action,
  pub family:       Family,
  pub workspace_id: Option<Uuid>,
  pub project_id:   Option<Uuid>,
  pub user_role:    Option<WorkspaceRole>,
}

// ─── Workspace rules ─────────────────────────────────────────────────────────

/// An operation a workspace admin has placed behind review. `operation: None`
/// guards every operation on the family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardedOp {
  pub family:    Family,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub operation: Option<Action>,
}

/// Per-workspace policy configuration, stored as JSON in the settings table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceRules {
  #[serde(default)]
  pub guarded: Vec<GuardedOp>,
}

impl WorkspaceRules {
  pub fn is_guarded(&self, family: Family, operation: Action) -> bool {
    self.guarded.iter().any(|g| {
      g.family == family && g.operation.map(|op| op == operation).unwrap_or(true)
    })
  }
}

/// Source of per-workspace rules. A failing lookup fails the whole emission —
/// the gateway is fail-closed and never defaults to "no validation required".
pub trait RuleSource: Send + Sync {
  fn workspace_rules(
    &self,
    workspace_id: Uuid,
  ) -> impl Future<Output = Result<WorkspaceRules>> + Send + '_;
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

/// Decide whether an intent requires validation. Pure; precedence is
/// role-override, then workspace config, then family defaults.
pub fn evaluate(rules: &WorkspaceRules, input: &PolicyInput) -> PolicyDecision {
  if let Some(role) = input.user_role
    && role.rank() >= WorkspaceRole::Admin.rank()
  {
    return PolicyDecision {
      requires_validation: false,
      reason: format!("{role} changes apply immediately"),
      source: PolicySource::RoleOverride,
    };
  }

  if input.workspace_id.is_some() && rules.is_guarded(input.family, input.operation) {
    return PolicyDecision {
      requires_validation: true,
      reason: format!(
        "admin-configured review for {}.{}",
        input.family, input.operation
      ),
      source: PolicySource::WorkspaceConfig,
    };
  }

  // Family defaults: membership changes and destructive operations go
  // through review; everything else applies immediately.
  let destructive =
    matches!(input.operation, Action::Delete | Action::Remove);
  if input.family == Family::WorkspaceMembers || destructive {
    return PolicyDecision {
      requires_validation: true,
      reason: format!(
        "{}.{} defaults to review",
        input.family, input.operation
      ),
      source: PolicySource::SubjectTypeDefault,
    };
  }

  PolicyDecision {
    requires_validation: false,
    reason: format!(
      "{}.{} applies immediately by default",
      input.family, input.operation
    ),
    source: PolicySource::SubjectTypeDefault,
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
