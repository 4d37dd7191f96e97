//! Connection tuning shared by every SQLite handle the crate opens

use rusqlite::Connection;

/// WAL pages written before an automatic checkpoint
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

/// Apply write-oriented PRAGMAs: WAL journal, NORMAL sync, in-memory temp
/// store, 64MB page cache and a 1000-page autocheckpoint
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        log::warn!("⚠️  SQLite refused WAL mode, running with journal_mode={}", mode);
    }

    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", -65_536_i64)?;

    // echoes the new value back as a row
    let _: i64 = conn.pragma_update_and_check(
        None,
        "wal_autocheckpoint",
        WAL_AUTOCHECKPOINT_PAGES,
        |row| row.get(0),
    )?;

    Ok(())
}
