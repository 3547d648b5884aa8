use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "refresh_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub user_id: String,

    /// Uppercase hex SHA-256 of the raw token
    #[sea_orm(unique)]
    pub token_hash: String,

    pub created_at: String,

    pub expires_at: String,

    pub revoked_at: Option<String>,

    pub replaced_by_token_id: Option<String>,

    pub device_fingerprint: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
