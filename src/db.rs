use crate::TutorError;
use crate::schema::MIGRATIONS;
use rusqlite::Connection;
use std::path::Path;

#[cfg(unix)]
fn ensure_secure_permissions(db_path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let Some(data_dir) = db_path.parent() else {
        return Ok(());
    };
    if !data_dir.as_os_str().is_empty() && !data_dir.exists() {
        std::fs::create_dir_all(data_dir)?;
        // Only set permissions on dirs we created
        std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700))?;
    }
    if db_path.exists() {
        std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_secure_permissions(db_path: &Path) -> std::io::Result<()> {
    if let Some(data_dir) = db_path.parent()
        && !data_dir.as_os_str().is_empty()
        && !data_dir.exists()
    {
        std::fs::create_dir_all(data_dir)?;
    }
    Ok(())
}

/// Apply standard PRAGMAs (before migrations).
fn apply_pragmas(conn: &Connection, readonly: bool) -> Result<(), TutorError> {
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    if !readonly {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
    }
    Ok(())
}

pub fn open_db_readonly(db_path: &Path) -> Result<Connection, TutorError> {
    if !db_path.exists() {
        return Err(TutorError::Config(format!(
            "database not found: {}",
            db_path.display()
        )));
    }

    let conn = Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    apply_pragmas(&conn, true)?;
    Ok(conn)
}

pub fn open_db(db_path: &Path) -> Result<Connection, TutorError> {
    ensure_secure_permissions(db_path)?;

    let mut conn = Connection::open(db_path)?;
    apply_pragmas(&conn, false)?;
    MIGRATIONS.to_latest(&mut conn)?;

    #[cfg(unix)]
    {
        if db_path.exists() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))?;
        }
    }

    log::debug!("opened database at {}", db_path.display());
    Ok(conn)
}
