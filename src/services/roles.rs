//! Role catalogue: named privilege sets, one module per privilege.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use utoipa::ToSchema;

use super::{ServiceError, ServiceResult, require};
use crate::access::{WriteAction, can_create};
use crate::models::{Entity, EntityKind, Privilege, RecordMeta, Role};
use crate::repositories::EntityRepository;
use crate::store::{Document, Filter};
use crate::tenancy::RequestContext;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewRole {
    pub role_name: String,
    pub privileges: Vec<Privilege>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RolePatch {
    pub role_name: Option<String>,
    pub privileges: Option<Vec<Privilege>>,
}

#[derive(Clone)]
pub struct RoleService {
    repo: EntityRepository,
}

impl RoleService {
    pub fn new(repo: EntityRepository) -> Self {
        Self { repo }
    }

    pub async fn create(&self, ctx: &RequestContext, request: NewRole) -> ServiceResult<Role> {
        can_create(ctx.caller(), EntityKind::Role)?;
        let role_name = normalize_name(&request.role_name)?;
        let privileges = normalize_privileges(request.privileges)?;
        self.ensure_name_free(ctx, &role_name, None).await?;

        let code = EntityKind::Role.new_code();
        let role = Role {
            meta: RecordMeta::created(&code, ctx.caller().code()),
            role_name,
            privileges,
        };
        self.repo.insert(ctx, &role).await?;
        info!(code = %code, role = %role.role_name, "Role created");
        Ok(role)
    }

    pub async fn update(&self, ctx: &RequestContext, code: &str, patch: RolePatch) -> ServiceResult<Role> {
        let current: Role = self
            .repo
            .load_for_write(ctx, code, WriteAction::Update)
            .await?;

        let mut changes = Document::new();
        if let Some(name) = patch.role_name {
            let name = normalize_name(&name)?;
            self.ensure_name_free(ctx, &name, Some(current.code())).await?;
            changes.insert("roleName".into(), Value::String(name));
        }
        if let Some(privileges) = patch.privileges {
            changes.insert("privileges".into(), json!(normalize_privileges(privileges)?));
        }
        if changes.is_empty() {
            return Err(ServiceError::validation("no valid fields to update"));
        }
        Ok(self.repo.update(ctx, code, changes).await?)
    }

    async fn ensure_name_free(&self, ctx: &RequestContext, name: &str, except: Option<&str>) -> ServiceResult<()> {
        let taken = self
            .repo
            .find_all_by::<Role>(ctx.deadline(), &Filter::new().eq("roleName", name))
            .await?
            .iter()
            .any(|role| Some(role.code()) != except);
        if taken {
            return Err(ServiceError::conflict(format!("role '{name}' already exists")));
        }
        Ok(())
    }
}

fn normalize_name(name: &str) -> ServiceResult<String> {
    require("roleName", name)?;
    Ok(name.trim().to_uppercase())
}

/// Trims modules and access values; modules must be unique and each needs access.
fn normalize_privileges(privileges: Vec<Privilege>) -> ServiceResult<Vec<Privilege>> {
    if privileges.is_empty() {
        return Err(ServiceError::validation("privileges cannot be empty"));
    }
    let mut modules = HashSet::new();
    privileges
        .into_iter()
        .enumerate()
        .map(|(index, privilege)| {
            let module = privilege.module.trim().to_string();
            if module.is_empty() {
                return Err(ServiceError::validation(format!(
                    "module cannot be empty at index {index}"
                )));
            }
            if !modules.insert(module.clone()) {
                return Err(ServiceError::validation(format!("duplicate module found: {module}")));
            }
            if privilege.access.is_empty() {
                return Err(ServiceError::validation(format!(
                    "access list cannot be empty for module {module}"
                )));
            }
            let access = privilege
                .access
                .iter()
                .map(|action| {
                    let action = action.trim();
                    if action.is_empty() {
                        Err(ServiceError::validation(format!(
                            "invalid access value for module {module}"
                        )))
                    } else {
                        Ok(action.to_string())
                    }
                })
                .collect::<ServiceResult<Vec<_>>>()?;
            Ok(Privilege { module, access })
        })
        .collect()
}
