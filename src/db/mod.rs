pub mod registry;
pub mod schema;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

pub fn open_or_create<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    schema::apply_pragmas(&conn)?;
    schema::apply_schema(&conn)?;
    Ok(conn)
}
