use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub scenario: String,
    pub bucket_id: String,
    pub message: String,
    pub events_count: i32,
    pub started_at: DateTimeWithTimeZone,
    pub stopped_at: DateTimeWithTimeZone,
    pub source_scope: String,
    pub source_value: String,
    pub source_ip: String,
    pub source_range: String,
    pub source_as_number: String,
    pub source_as_name: String,
    pub source_country: String,
    pub source_latitude: f32,
    pub source_longitude: f32,
    pub capacity: i32,
    pub leak_speed: i32,
    pub reprocess: bool,
    pub machine_id: i64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::machine::Entity",
        from = "Column::MachineId",
        to = "super::machine::Column::Id",
        on_delete = "Restrict"
    )]
    Machine,
    #[sea_orm(has_many = "super::event::Entity")]
    Events,
    #[sea_orm(has_many = "super::meta::Entity")]
    Metas,
    #[sea_orm(has_many = "super::decision::Entity")]
    Decisions,
}

impl Related<super::machine::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Machine.def()
    }
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Events.def()
    }
}

impl Related<super::meta::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Metas.def()
    }
}

impl Related<super::decision::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Decisions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
