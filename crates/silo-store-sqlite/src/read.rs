//! [`ReadStore`] — tenant-scoped queries over the projection tables.

use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use silo_core::{
  Result,
  projection::{
    ApiKeyRecord, EntityRecord, ProjectRecord, ProposalRecord, ProposalStatus,
    ReadStore,
  },
  role::Membership,
};

use crate::{
  encode::{RawApiKey, RawEntity, RawMember, RawProject, RawProposal, encode_uuid},
  projections::{PROPOSAL_COLUMNS, entity_row, member_row, proposal_row},
  store::{SqliteStore, storage},
};

const ENTITY_COLUMNS: &str = "entity_id, workspace_id, user_id, title, body,
                              created_at, updated_at, deleted_at";

const PROJECT_COLUMNS: &str =
  "project_id, workspace_id, user_id, name, description, created_at, updated_at";

impl ReadStore for SqliteStore {
  async fn entity(&self, id: Uuid) -> Result<Option<EntityRecord>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawEntity> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ENTITY_COLUMNS} FROM entities
                 WHERE entity_id = ?1 AND deleted_at IS NULL"
              ),
              rusqlite::params![id_str],
              entity_row,
            )
            .optional()?,
        )
      })
      .await
      .map_err(storage)?;

    raw.map(RawEntity::into_record).transpose()
  }

  async fn entities_in_workspace(&self, workspace_id: Uuid) -> Result<Vec<EntityRecord>> {
    let ws_str = encode_uuid(workspace_id);

    let raws: Vec<RawEntity> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ENTITY_COLUMNS} FROM entities
           WHERE workspace_id = ?1 AND deleted_at IS NULL
           ORDER BY created_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![ws_str], entity_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(storage)?;

    raws.into_iter().map(RawEntity::into_record).collect()
  }

  async fn entities_for_user(&self, user_id: Uuid) -> Result<Vec<EntityRecord>> {
    let user_str = encode_uuid(user_id);

    let raws: Vec<RawEntity> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ENTITY_COLUMNS} FROM entities
           WHERE user_id = ?1 AND deleted_at IS NULL
           ORDER BY created_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![user_str], entity_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(storage)?;

    raws.into_iter().map(RawEntity::into_record).collect()
  }

  async fn project(&self, id: Uuid) -> Result<Option<ProjectRecord>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawProject> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE project_id = ?1"),
              rusqlite::params![id_str],
              |row| {
                Ok(RawProject {
                  project_id:   row.get(0)?,
                  workspace_id: row.get(1)?,
                  user_id:      row.get(2)?,
                  name:         row.get(3)?,
                  description:  row.get(4)?,
                  created_at:   row.get(5)?,
                  updated_at:   row.get(6)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await
      .map_err(storage)?;

    raw.map(RawProject::into_record).transpose()
  }

  async fn projects_in_workspace(&self, workspace_id: Uuid) -> Result<Vec<ProjectRecord>> {
    let ws_str = encode_uuid(workspace_id);

    let raws: Vec<RawProject> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PROJECT_COLUMNS} FROM projects
           WHERE workspace_id = ?1
           ORDER BY created_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![ws_str], |row| {
            Ok(RawProject {
              project_id:   row.get(0)?,
              workspace_id: row.get(1)?,
              user_id:      row.get(2)?,
              name:         row.get(3)?,
              description:  row.get(4)?,
              created_at:   row.get(5)?,
              updated_at:   row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(storage)?;

    raws.into_iter().map(RawProject::into_record).collect()
  }

  async fn members(&self, workspace_id: Uuid) -> Result<Vec<Membership>> {
    let ws_str = encode_uuid(workspace_id);

    let raws: Vec<RawMember> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT workspace_id, user_id, role, added_by, created_at, updated_at
           FROM workspace_members
           WHERE workspace_id = ?1
           ORDER BY created_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![ws_str], member_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(storage)?;

    raws.into_iter().map(RawMember::into_membership).collect()
  }

  async fn proposals(
    &self,
    workspace_id: Uuid,
    status: Option<ProposalStatus>,
  ) -> Result<Vec<ProposalRecord>> {
    let ws_str     = encode_uuid(workspace_id);
    let status_str = status.map(|s| s.as_str().to_owned());

    let raws: Vec<RawProposal> = self
      .conn
      .call(move |conn| {
        let rows = if let Some(s) = status_str {
          let mut stmt = conn.prepare(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposals
             WHERE workspace_id = ?1 AND status = ?2
             ORDER BY created_at"
          ))?;
          stmt
            .query_map(rusqlite::params![ws_str, s], proposal_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposals
             WHERE workspace_id = ?1
             ORDER BY created_at"
          ))?;
          stmt
            .query_map(rusqlite::params![ws_str], proposal_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await
      .map_err(storage)?;

    raws.into_iter().map(RawProposal::into_record).collect()
  }

  async fn api_keys_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKeyRecord>> {
    let user_str = encode_uuid(user_id);

    let raws: Vec<RawApiKey> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT api_key_id, user_id, workspace_id, name, prefix, digest,
                  created_at, revoked_at
           FROM api_keys
           WHERE user_id = ?1
           ORDER BY created_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user_str], |row| {
            Ok(RawApiKey {
              api_key_id:   row.get(0)?,
              user_id:      row.get(1)?,
              workspace_id: row.get(2)?,
              name:         row.get(3)?,
              prefix:       row.get(4)?,
              digest:       row.get(5)?,
              created_at:   row.get(6)?,
              revoked_at:   row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(storage)?;

    raws.into_iter().map(RawApiKey::into_record).collect()
  }
}
