use sea_orm_migration::prelude::*;

mod m0001_create_schools;
mod m0002_create_users;
mod m0003_create_refresh_tokens;
mod m0004_create_audit_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m0001_create_schools::Migration),
            Box::new(m0002_create_users::Migration),
            Box::new(m0003_create_refresh_tokens::Migration),
            Box::new(m0004_create_audit_events::Migration),
        ]
    }
}
