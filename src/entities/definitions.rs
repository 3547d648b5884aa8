use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "definitions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub name: String,

    /// Prompt | Workflow | ...
    pub kind: String,

    pub version: i32,

    #[sea_orm(column_type = "Text")]
    pub content_yaml: String,

    pub created_by: String,

    pub created_at: String,

    /// Lowercase hex SHA-256 of `content_yaml`
    pub content_hash: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
