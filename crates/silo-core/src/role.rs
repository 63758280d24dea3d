//! Workspace role hierarchy and the permission gate.
//!
//! Role checks are always "at least N" comparisons against a fixed ranking
//! (viewer < editor < admin < owner), never exact matches. A missing
//! membership is reported as `NotFound` — deliberately indistinguishable
//! from "no such workspace" so existence never leaks to outsiders.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Roles ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceRole {
  Viewer,
  Editor,
  Admin,
  Owner,
}

impl WorkspaceRole {
  /// Position in the strict hierarchy; higher rank implies every lower one.
  pub fn rank(&self) -> u8 {
    match self {
      Self::Viewer => 1,
      Self::Editor => 2,
      Self::Admin => 3,
      Self::Owner => 4,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Viewer => "viewer",
      Self::Editor => "editor",
      Self::Admin => "admin",
      Self::Owner => "owner",
    }
  }
}

impl FromStr for WorkspaceRole {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "viewer" => Ok(Self::Viewer),
      "editor" => Ok(Self::Editor),
      "admin" => Ok(Self::Admin),
      "owner" => Ok(Self::Owner),
      other => Err(Error::Validation(format!("unknown workspace role: {other:?}"))),
    }
  }
}

impl fmt::Display for WorkspaceRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Membership ──────────────────────────────────────────────────────────────

/// A `(workspace, user)` membership row. The pair is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
  pub workspace_id: Uuid,
  pub user_id:      Uuid,
  pub role:         WorkspaceRole,
  pub added_by:     Option<Uuid>,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
}

/// Read seam the permission gate runs against.
pub trait MembershipStore: Send + Sync {
  fn membership(
    &self,
    workspace_id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Option<Membership>>> + Send + '_;
}

// ─── Gate ────────────────────────────────────────────────────────────────────

/// Require `minimum` role or higher in `workspace_id`.
///
/// `NotFound` when no membership row exists; `Forbidden` (naming both roles)
/// when the membership's rank falls short.
pub async fn require_workspace_role<M: MembershipStore>(
  store: &M,
  workspace_id: Uuid,
  user_id: Uuid,
  minimum: WorkspaceRole,
) -> Result<Membership> {
  let membership = store
    .membership(workspace_id, user_id)
    .await?
    .ok_or_else(|| Error::NotFound(format!("workspace {workspace_id} not found")))?;

  if membership.role.rank() < minimum.rank() {
    return Err(Error::Forbidden(format!(
      "requires {minimum} role or higher (you have: {})",
      membership.role
    )));
  }
  Ok(membership)
}

/// Boolean variant of [`require_workspace_role`]; discards the error. For
/// conditional logic only, never for enforcement.
pub async fn has_workspace_role<M: MembershipStore>(
  store: &M,
  workspace_id: Uuid,
  user_id: Uuid,
  minimum: WorkspaceRole,
) -> bool {
  require_workspace_role(store, workspace_id, user_id, minimum)
    .await
    .is_ok()
}

/// For resources without workspace scoping: the acting user must be the
/// owner, exactly.
pub fn require_resource_owner(owner_id: Uuid, user_id: Uuid) -> Result<()> {
  if owner_id != user_id {
    return Err(Error::Forbidden(
      "only the resource owner may do this".to_string(),
    ));
  }
  Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  /// Single-membership fake used to exercise the gate.
  struct OneMember {
    workspace_id: Uuid,
    user_id:      Uuid,
    role:         WorkspaceRole,
  }

  impl MembershipStore for OneMember {
    async fn membership(
      &self,
      workspace_id: Uuid,
      user_id: Uuid,
    ) -> Result<Option<Membership>> {
      if workspace_id == self.workspace_id && user_id == self.user_id {
        Ok(Some(Membership {
          workspace_id,
          user_id,
          role: self.role,
          added_by: None,
          created_at: Utc::now(),
          updated_at: Utc::now(),
        }))
      } else {
        Ok(None)
      }
    }
  }

  const ROLES: [WorkspaceRole; 4] = [
    WorkspaceRole::Viewer,
    WorkspaceRole::Editor,
    WorkspaceRole::Admin,
    WorkspaceRole::Owner,
  ];

  #[tokio::test]
  async fn role_check_is_monotonic_over_the_hierarchy() {
    let ws = Uuid::new_v4();
    let user = Uuid::new_v4();

    for actual in ROLES {
      let store = OneMember { workspace_id: ws, user_id: user, role: actual };
      for minimum in ROLES {
        let result = require_workspace_role(&store, ws, user, minimum).await;
        if actual.rank() >= minimum.rank() {
          assert!(result.is_ok(), "{actual} should satisfy {minimum}");
        } else {
          assert!(
            matches!(result, Err(Error::Forbidden(_))),
            "{actual} should not satisfy {minimum}"
          );
        }
      }
    }
  }

  #[tokio::test]
  async fn forbidden_message_names_both_roles() {
    let ws = Uuid::new_v4();
    let user = Uuid::new_v4();
    let store = OneMember { workspace_id: ws, user_id: user, role: WorkspaceRole::Viewer };

    let err = require_workspace_role(&store, ws, user, WorkspaceRole::Editor)
      .await
      .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("editor"), "message: {message}");
    assert!(message.contains("viewer"), "message: {message}");
  }

  #[tokio::test]
  async fn missing_membership_is_not_found() {
    let store = OneMember {
      workspace_id: Uuid::new_v4(),
      user_id:      Uuid::new_v4(),
      role:         WorkspaceRole::Owner,
    };
    let err =
      require_workspace_role(&store, Uuid::new_v4(), Uuid::new_v4(), WorkspaceRole::Viewer)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
  }

  #[tokio::test]
  async fn has_role_discards_errors() {
    let ws = Uuid::new_v4();
    let user = Uuid::new_v4();
    let store = OneMember { workspace_id: ws, user_id: user, role: WorkspaceRole::Viewer };

    assert!(has_workspace_role(&store, ws, user, WorkspaceRole::Viewer).await);
    assert!(!has_workspace_role(&store, ws, user, WorkspaceRole::Admin).await);
    assert!(!has_workspace_role(&store, Uuid::new_v4(), user, WorkspaceRole::Viewer).await);
  }

  #[test]
  fn resource_owner_check_is_strict_equality() {
    let owner = Uuid::new_v4();
    assert!(require_resource_owner(owner, owner).is_ok());
    assert!(matches!(
      require_resource_owner(owner, Uuid::new_v4()),
      Err(Error::Forbidden(_))
    ));
  }
}
