//! Named privilege sets managed by super-administrators.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Entity, EntityKind, RecordMeta};

/// Access granted on one module, e.g. `testReport` with `["create", "view"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Privilege {
    pub module: String,
    pub access: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(flatten)]
    pub meta: RecordMeta,
    /// Upper-cased and unique across roles.
    pub role_name: String,
    pub privileges: Vec<Privilege>,
}

impl Entity for Role {
    const KIND: EntityKind = EntityKind::Role;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}
