//! Per-family projection repositories.
//!
//! Each mutation is exactly one DB write scoped by `(id, user_id)` — tenant
//! isolation lives in the WHERE clause, not only in the application layer.
//! Zero affected rows surfaces as `NotFound` whether the id is wrong or the
//! row belongs to another tenant.
//!
//! After a successful write, every repository appends one
//! `{family}.{action}.completed` event. The proposal repository is the
//! deliberate exception: proposals are artifacts of the event flow itself,
//! and double-logging them is forbidden.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::Utc;
use rand_core::{OsRng, RngCore as _};
use rusqlite::OptionalExtension as _;
use serde_json::json;
use sha2::{Digest as _, Sha256};
use uuid::Uuid;

use silo_core::{
  Error, Result,
  event::{Action, Family},
  projection::{
    ApiKeyRecord, ApiKeyRepo, EntityPatch, EntityRecord, EntityRepo, IssuedKey,
    NewApiKey, NewEntity, NewMember, NewProject, NewProposal, ProjectPatch,
    ProjectRecord, ProjectRepo, ProposalRecord, ProposalRepo, ProposalStatus,
    MemberRepo,
  },
  role::{Membership, WorkspaceRole},
};

use crate::{
  encode::{RawEntity, RawMember, RawProject, RawProposal, encode_dt, encode_uuid},
  store::{SqliteStore, is_constraint, storage},
};

// ─── Entities ────────────────────────────────────────────────────────────────

impl EntityRepo for SqliteStore {
  async fn create_entity(&self, input: NewEntity, user_id: Uuid) -> Result<EntityRecord> {
    let now = Utc::now();
    let record = EntityRecord {
      entity_id:    input.entity_id,
      workspace_id: input.workspace_id,
      user_id,
      title:        input.title,
      body:         input.body,
      created_at:   now,
      updated_at:   now,
      deleted_at:   None,
    };

    let id_str   = encode_uuid(record.entity_id);
    let ws_str   = record.workspace_id.map(encode_uuid);
    let user_str = encode_uuid(user_id);
    let title    = record.title.clone();
    let body_str = record.body.to_string();
    let at_str   = encode_dt(now);

    let outcome = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO entities (
             entity_id, workspace_id, user_id, title, body, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
          rusqlite::params![id_str, ws_str, user_str, title, body_str, at_str],
        )?;
        Ok(())
      })
      .await;

    match outcome {
      Ok(()) => {}
      Err(e) if is_constraint(&e) => {
        return Err(Error::AlreadyExists(format!("entity {}", record.entity_id)));
      }
      Err(e) => return Err(storage(e)),
    }

    self
      .append_completed(
        Family::Entities,
        Action::Create,
        record.entity_id,
        json!({
          "entity_id": record.entity_id,
          "workspace_id": record.workspace_id,
          "title": record.title,
        }),
        user_id,
      )
      .await?;

    Ok(record)
  }

  async fn update_entity(
    &self,
    id: Uuid,
    patch: EntityPatch,
    user_id: Uuid,
  ) -> Result<EntityRecord> {
    let id_str   = encode_uuid(id);
    let user_str = encode_uuid(user_id);
    let title    = patch.title;
    let body_str = patch.body.map(|b| b.to_string());
    let at_str   = encode_dt(Utc::now());

    let raw: Option<RawEntity> = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE entities
           SET title      = COALESCE(?3, title),
               body       = COALESCE(?4, body),
               updated_at = ?5
           WHERE entity_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
          rusqlite::params![id_str, user_str, title, body_str, at_str],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        let raw = conn.query_row(
          "SELECT entity_id, workspace_id, user_id, title, body,
                  created_at, updated_at, deleted_at
           FROM entities WHERE entity_id = ?1",
          rusqlite::params![id_str],
          entity_row,
        )?;
        Ok(Some(raw))
      })
      .await
      .map_err(storage)?;

    let record = raw
      .ok_or_else(|| Error::NotFound(format!("entity {id} not found")))?
      .into_record()?;

    self
      .append_completed(
        Family::Entities,
        Action::Update,
        record.entity_id,
        json!({
          "entity_id": record.entity_id,
          "workspace_id": record.workspace_id,
          "title": record.title,
        }),
        user_id,
      )
      .await?;

    Ok(record)
  }

  async fn delete_entity(&self, id: Uuid, user_id: Uuid) -> Result<()> {
    let id_str   = encode_uuid(id);
    let user_str = encode_uuid(user_id);
    let at_str   = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE entities SET deleted_at = ?3, updated_at = ?3
           WHERE entity_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
          rusqlite::params![id_str, user_str, at_str],
        )?)
      })
      .await
      .map_err(storage)?;

    if changed == 0 {
      return Err(Error::NotFound(format!("entity {id} not found")));
    }

    self
      .append_completed(
        Family::Entities,
        Action::Delete,
        id,
        json!({ "entity_id": id }),
        user_id,
      )
      .await
  }
}

pub(crate) fn entity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntity> {
  Ok(RawEntity {
    entity_id:    row.get(0)?,
    workspace_id: row.get(1)?,
    user_id:      row.get(2)?,
    title:        row.get(3)?,
    body:         row.get(4)?,
    created_at:   row.get(5)?,
    updated_at:   row.get(6)?,
    deleted_at:   row.get(7)?,
  })
}

// ─── Projects ────────────────────────────────────────────────────────────────

impl ProjectRepo for SqliteStore {
  async fn create_project(&self, input: NewProject, user_id: Uuid) -> Result<ProjectRecord> {
    let now = Utc::now();
    let record = ProjectRecord {
      project_id:   input.project_id,
      workspace_id: input.workspace_id,
      user_id,
      name:         input.name,
      description:  input.description,
      created_at:   now,
      updated_at:   now,
    };

    let id_str   = encode_uuid(record.project_id);
    let ws_str   = encode_uuid(record.workspace_id);
    let user_str = encode_uuid(user_id);
    let name     = record.name.clone();
    let desc     = record.description.clone();
    let at_str   = encode_dt(now);

    let outcome = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO projects (
             project_id, workspace_id, user_id, name, description, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
          rusqlite::params![id_str, ws_str, user_str, name, desc, at_str],
        )?;
        Ok(())
      })
      .await;

    match outcome {
      Ok(()) => {}
      Err(e) if is_constraint(&e) => {
        return Err(Error::AlreadyExists(format!("project {}", record.project_id)));
      }
      Err(e) => return Err(storage(e)),
    }

    self
      .append_completed(
        Family::Projects,
        Action::Create,
        record.project_id,
        json!({
          "project_id": record.project_id,
          "workspace_id": record.workspace_id,
          "name": record.name,
        }),
        user_id,
      )
      .await?;

    Ok(record)
  }

  async fn update_project(
    &self,
    id: Uuid,
    patch: ProjectPatch,
    user_id: Uuid,
  ) -> Result<ProjectRecord> {
    let id_str   = encode_uuid(id);
    let user_str = encode_uuid(user_id);
    let name     = patch.name;
    let desc     = patch.description;
    let at_str   = encode_dt(Utc::now());

    let raw: Option<RawProject> = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE projects
           SET name        = COALESCE(?3, name),
               description = COALESCE(?4, description),
               updated_at  = ?5
           WHERE project_id = ?1 AND user_id = ?2",
          rusqlite::params![id_str, user_str, name, desc, at_str],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        let raw = conn.query_row(
          "SELECT project_id, workspace_id, user_id, name, description,
                  created_at, updated_at
           FROM projects WHERE project_id = ?1",
          rusqlite::params![id_str],
          project_row,
        )?;
        Ok(Some(raw))
      })
      .await
      .map_err(storage)?;

    let record = raw
      .ok_or_else(|| Error::NotFound(format!("project {id} not found")))?
      .into_record()?;

    self
      .append_completed(
        Family::Projects,
        Action::Update,
        record.project_id,
        json!({
          "project_id": record.project_id,
          "workspace_id": record.workspace_id,
          "name": record.name,
        }),
        user_id,
      )
      .await?;

    Ok(record)
  }

  async fn delete_project(&self, id: Uuid, user_id: Uuid) -> Result<()> {
    let id_str   = encode_uuid(id);
    let user_str = encode_uuid(user_id);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM projects WHERE project_id = ?1 AND user_id = ?2",
          rusqlite::params![id_str, user_str],
        )?)
      })
      .await
      .map_err(storage)?;

    if changed == 0 {
      return Err(Error::NotFound(format!("project {id} not found")));
    }

    self
      .append_completed(
        Family::Projects,
        Action::Delete,
        id,
        json!({ "project_id": id }),
        user_id,
      )
      .await
  }
}

fn project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawProject> {
  Ok(RawProject {
    project_id:   row.get(0)?,
    workspace_id: row.get(1)?,
    user_id:      row.get(2)?,
    name:         row.get(3)?,
    description:  row.get(4)?,
    created_at:   row.get(5)?,
    updated_at:   row.get(6)?,
  })
}

// ─── Workspace members ───────────────────────────────────────────────────────

impl MemberRepo for SqliteStore {
  async fn add_member(
    &self,
    workspace_id: Uuid,
    member: NewMember,
    acting: Uuid,
  ) -> Result<Membership> {
    let now = Utc::now();
    let membership = Membership {
      workspace_id,
      user_id:    member.user_id,
      role:       member.role,
      added_by:   Some(acting),
      created_at: now,
      updated_at: now,
    };

    let ws_str     = encode_uuid(workspace_id);
    let user_str   = encode_uuid(member.user_id);
    let role_str   = member.role.as_str().to_owned();
    let added_str  = encode_uuid(acting);
    let at_str     = encode_dt(now);

    let outcome = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO workspace_members (
             workspace_id, user_id, role, added_by, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
          rusqlite::params![ws_str, user_str, role_str, added_str, at_str],
        )?;
        Ok(())
      })
      .await;

    match outcome {
      Ok(()) => {}
      Err(e) if is_constraint(&e) => {
        return Err(Error::AlreadyExists(format!(
          "member {} in workspace {workspace_id}",
          member.user_id
        )));
      }
      Err(e) => return Err(storage(e)),
    }

    self
      .append_completed(
        Family::WorkspaceMembers,
        Action::Add,
        member.user_id,
        json!({
          "workspace_id": workspace_id,
          "user_id": member.user_id,
          "role": member.role,
        }),
        acting,
      )
      .await?;

    Ok(membership)
  }

  async fn update_member_role(
    &self,
    workspace_id: Uuid,
    user_id: Uuid,
    role: WorkspaceRole,
    acting: Uuid,
  ) -> Result<Membership> {
    let ws_str   = encode_uuid(workspace_id);
    let user_str = encode_uuid(user_id);
    let role_str = role.as_str().to_owned();
    let at_str   = encode_dt(Utc::now());

    let raw: Option<RawMember> = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE workspace_members SET role = ?3, updated_at = ?4
           WHERE workspace_id = ?1 AND user_id = ?2",
          rusqlite::params![ws_str, user_str, role_str, at_str],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        let raw = conn.query_row(
          "SELECT workspace_id, user_id, role, added_by, created_at, updated_at
           FROM workspace_members
           WHERE workspace_id = ?1 AND user_id = ?2",
          rusqlite::params![ws_str, user_str],
          member_row,
        )?;
        Ok(Some(raw))
      })
      .await
      .map_err(storage)?;

    let membership = raw
      .ok_or_else(|| {
        Error::NotFound(format!("member {user_id} in workspace {workspace_id} not found"))
      })?
      .into_membership()?;

    self
      .append_completed(
        Family::WorkspaceMembers,
        Action::UpdateRole,
        user_id,
        json!({
          "workspace_id": workspace_id,
          "user_id": user_id,
          "role": membership.role,
        }),
        acting,
      )
      .await?;

    Ok(membership)
  }

  async fn remove_member(
    &self,
    workspace_id: Uuid,
    user_id: Uuid,
    acting: Uuid,
  ) -> Result<()> {
    let ws_str   = encode_uuid(workspace_id);
    let user_str = encode_uuid(user_id);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
          rusqlite::params![ws_str, user_str],
        )?)
      })
      .await
      .map_err(storage)?;

    if changed == 0 {
      return Err(Error::NotFound(format!(
        "member {user_id} in workspace {workspace_id} not found"
      )));
    }

    self
      .append_completed(
        Family::WorkspaceMembers,
        Action::Remove,
        user_id,
        json!({ "workspace_id": workspace_id, "user_id": user_id }),
        acting,
      )
      .await
  }
}

pub(crate) fn member_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMember> {
  Ok(RawMember {
    workspace_id: row.get(0)?,
    user_id:      row.get(1)?,
    role:         row.get(2)?,
    added_by:     row.get(3)?,
    created_at:   row.get(4)?,
    updated_at:   row.get(5)?,
  })
}

// ─── API keys ────────────────────────────────────────────────────────────────

impl ApiKeyRepo for SqliteStore {
  async fn issue_api_key(&self, input: NewApiKey, user_id: Uuid) -> Result<IssuedKey> {
    // 32 random bytes, URL-safe base64. Only the digest hits the database.
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    let secret = format!("sk_{}", B64.encode(raw));
    let prefix = secret[..10.min(secret.len())].to_string();
    let digest = hex::encode(Sha256::digest(secret.as_bytes()));

    let now = Utc::now();
    let record = ApiKeyRecord {
      api_key_id:   Uuid::new_v4(),
      user_id,
      workspace_id: input.workspace_id,
      name:         input.name,
      prefix:       prefix.clone(),
      digest:       digest.clone(),
      created_at:   now,
      revoked_at:   None,
    };

    let id_str   = encode_uuid(record.api_key_id);
    let user_str = encode_uuid(user_id);
    let ws_str   = record.workspace_id.map(encode_uuid);
    let name     = record.name.clone();
    let at_str   = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO api_keys (
             api_key_id, user_id, workspace_id, name, prefix, digest, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![id_str, user_str, ws_str, name, prefix, digest, at_str],
        )?;
        Ok(())
      })
      .await
      .map_err(storage)?;

    self
      .append_completed(
        Family::ApiKeys,
        Action::Create,
        record.api_key_id,
        json!({
          "api_key_id": record.api_key_id,
          "name": record.name,
          "prefix": record.prefix,
        }),
        user_id,
      )
      .await?;

    Ok(IssuedKey { record, secret })
  }

  async fn revoke_api_key(&self, id: Uuid, user_id: Uuid) -> Result<()> {
    let id_str   = encode_uuid(id);
    let user_str = encode_uuid(user_id);
    let at_str   = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE api_keys SET revoked_at = ?3
           WHERE api_key_id = ?1 AND user_id = ?2 AND revoked_at IS NULL",
          rusqlite::params![id_str, user_str, at_str],
        )?)
      })
      .await
      .map_err(storage)?;

    if changed == 0 {
      return Err(Error::NotFound(format!("api key {id} not found")));
    }

    self
      .append_completed(
        Family::ApiKeys,
        Action::Delete,
        id,
        json!({ "api_key_id": id }),
        user_id,
      )
      .await
  }
}

// ─── Proposals ───────────────────────────────────────────────────────────────

// The one family that emits nothing: proposals ARE the event flow, so the
// log is never touched here.
impl ProposalRepo for SqliteStore {
  async fn file_proposal(&self, input: NewProposal) -> Result<ProposalRecord> {
    let now = Utc::now();
    let record = ProposalRecord {
      proposal_id:    Uuid::new_v4(),
      workspace_id:   input.workspace_id,
      target_family:  input.target_family,
      target_id:      input.target_id,
      operation:      input.operation,
      payload:        input.payload,
      correlation_id: input.correlation_id,
      status:         ProposalStatus::Pending,
      proposed_by:    input.proposed_by,
      reviewed_by:    None,
      created_at:     now,
      reviewed_at:    None,
    };

    let id_str     = encode_uuid(record.proposal_id);
    let ws_str     = encode_uuid(record.workspace_id);
    let family_str = record.target_family.as_str().to_owned();
    let target_str = encode_uuid(record.target_id);
    let op_str     = record.operation.as_str().to_owned();
    let payload    = record.payload.to_string();
    let corr_str   = record.correlation_id.map(encode_uuid);
    let by_str     = encode_uuid(record.proposed_by);
    let at_str     = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO proposals (
             proposal_id, workspace_id, target_family, target_id, operation,
             payload, correlation_id, status, proposed_by, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9)",
          rusqlite::params![
            id_str, ws_str, family_str, target_str, op_str, payload, corr_str,
            by_str, at_str,
          ],
        )?;
        Ok(())
      })
      .await
      .map_err(storage)?;

    Ok(record)
  }

  async fn proposal(&self, id: Uuid) -> Result<Option<ProposalRecord>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawProposal> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE proposal_id = ?1"),
              rusqlite::params![id_str],
              proposal_row,
            )
            .optional()?,
        )
      })
      .await
      .map_err(storage)?;

    raw.map(RawProposal::into_record).transpose()
  }

  async fn resolve_proposal(
    &self,
    id: Uuid,
    status: ProposalStatus,
    reviewer: Uuid,
  ) -> Result<ProposalRecord> {
    let id_str       = encode_uuid(id);
    let status_str   = status.as_str().to_owned();
    let reviewer_str = encode_uuid(reviewer);
    let at_str       = encode_dt(Utc::now());

    enum Outcome {
      Missing,
      AlreadyResolved(String),
      Resolved(RawProposal),
    }

    let outcome = self
      .conn
      .call(move |conn| {
        let current: Option<String> = conn
          .query_row(
            "SELECT status FROM proposals WHERE proposal_id = ?1",
            rusqlite::params![id_str],
            |row| row.get(0),
          )
          .optional()?;

        match current.as_deref() {
          None => Ok(Outcome::Missing),
          Some(s) if s != "pending" => Ok(Outcome::AlreadyResolved(s.to_owned())),
          Some(_) => {
            conn.execute(
              "UPDATE proposals
               SET status = ?2, reviewed_by = ?3, reviewed_at = ?4
               WHERE proposal_id = ?1 AND status = 'pending'",
              rusqlite::params![id_str, status_str, reviewer_str, at_str],
            )?;
            let raw = conn.query_row(
              &format!("SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE proposal_id = ?1"),
              rusqlite::params![id_str],
              proposal_row,
            )?;
            Ok(Outcome::Resolved(raw))
          }
        }
      })
      .await
      .map_err(storage)?;

    match outcome {
      Outcome::Missing => Err(Error::NotFound(format!("proposal {id} not found"))),
      Outcome::AlreadyResolved(s) => {
        Err(Error::Validation(format!("proposal {id} is already {s}")))
      }
      Outcome::Resolved(raw) => raw.into_record(),
    }
  }
}

pub(crate) const PROPOSAL_COLUMNS: &str =
  "proposal_id, workspace_id, target_family, target_id, operation,
   payload, correlation_id, status, proposed_by, reviewed_by,
   created_at, reviewed_at";

pub(crate) fn proposal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawProposal> {
  Ok(RawProposal {
    proposal_id:    row.get(0)?,
    workspace_id:   row.get(1)?,
    target_family:  row.get(2)?,
    target_id:      row.get(3)?,
    operation:      row.get(4)?,
    payload:        row.get(5)?,
    correlation_id: row.get(6)?,
    status:         row.get(7)?,
    proposed_by:    row.get(8)?,
    reviewed_by:    row.get(9)?,
    created_at:     row.get(10)?,
    reviewed_at:    row.get(11)?,
  })
}
