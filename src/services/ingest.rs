use crate::db::models::{
    NewBatteryInterval, NewConsumptionInterval, NewExportInterval, NewImportInterval, NewProductionMeterInterval,
};
use crate::schema;
use diesel::PgConnection;
use diesel::prelude::*;

/// Rows per INSERT, keeping bind parameters well below the Postgres limit.
const INSERT_BATCH: usize = 1_000;

pub fn insert_production_meter(conn: &mut PgConnection, rows: &[NewProductionMeterInterval]) -> Result<usize, String> {
    use schema::production_meter::dsl as P;

    let mut inserted = 0;
    for batch in rows.chunks(INSERT_BATCH) {
        inserted += diesel::insert_into(P::production_meter)
            .values(batch)
            .on_conflict((P::system_id, P::end_at))
            .do_nothing()
            .execute(conn)
            .map_err(|e| format!("insert production_meter rows failed: {}", e))?;
    }
    Ok(inserted)
}

pub fn insert_consumption(conn: &mut PgConnection, rows: &[NewConsumptionInterval]) -> Result<usize, String> {
    use schema::consumption::dsl as C;

    let mut inserted = 0;
    for batch in rows.chunks(INSERT_BATCH) {
        inserted += diesel::insert_into(C::consumption)
            .values(batch)
            .on_conflict((C::system_id, C::end_at))
            .do_nothing()
            .execute(conn)
            .map_err(|e| format!("insert consumption rows failed: {}", e))?;
    }
    Ok(inserted)
}

pub fn insert_battery(conn: &mut PgConnection, rows: &[NewBatteryInterval]) -> Result<usize, String> {
    use schema::battery::dsl as B;

    let mut inserted = 0;
    for batch in rows.chunks(INSERT_BATCH) {
        inserted += diesel::insert_into(B::battery)
            .values(batch)
            .on_conflict((B::system_id, B::end_at))
            .do_nothing()
            .execute(conn)
            .map_err(|e| format!("insert battery rows failed: {}", e))?;
    }
    Ok(inserted)
}

pub fn insert_import(conn: &mut PgConnection, rows: &[NewImportInterval]) -> Result<usize, String> {
    use schema::import::dsl as I;

    let mut inserted = 0;
    for batch in rows.chunks(INSERT_BATCH) {
        inserted += diesel::insert_into(I::import)
            .values(batch)
            .on_conflict((I::system_id, I::end_at))
            .do_nothing()
            .execute(conn)
            .map_err(|e| format!("insert import rows failed: {}", e))?;
    }
    Ok(inserted)
}

pub fn insert_export(conn: &mut PgConnection, rows: &[NewExportInterval]) -> Result<usize, String> {
    use schema::export::dsl as E;

    let mut inserted = 0;
    for batch in rows.chunks(INSERT_BATCH) {
        inserted += diesel::insert_into(E::export)
            .values(batch)
            .on_conflict((E::system_id, E::end_at))
            .do_nothing()
            .execute(conn)
            .map_err(|e| format!("insert export rows failed: {}", e))?;
    }
    Ok(inserted)
}
