// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、批次种子数据
// ==========================================

use rusqlite::{params, Connection};
use std::error::Error;
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = Connection::open(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 初始化数据库 schema
fn init_schema(conn: &Connection) -> Result<(), Box<dyn Error>> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_scope (
            scope_id TEXT PRIMARY KEY,
            scope_type TEXT NOT NULL,
            scope_key TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(scope_type, scope_key)
        );
        INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
        VALUES ('global', 'GLOBAL', 'global');

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS batch_master (
            batch_id TEXT PRIMARY KEY,
            system_id INTEGER NOT NULL,
            company_id INTEGER NOT NULL,
            batch_name TEXT NOT NULL,
            sequence_no INTEGER NOT NULL DEFAULT 0,
            mfd_status TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
            updated_at TEXT,
            updated_by TEXT
        );

        CREATE TABLE IF NOT EXISTS canister_batch (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT NOT NULL,
            order_no INTEGER NOT NULL,
            dest_device_id INTEGER NOT NULL,
            dest_quadrant INTEGER NOT NULL,
            status TEXT NOT NULL,
            assigned_operator INTEGER,
            mfd_canister_id INTEGER,
            mfs_device_id INTEGER,
            mfs_location_number INTEGER,
            trolley_location_id INTEGER,
            trolley_seq INTEGER,
            transferred_location_id INTEGER,
            created_by TEXT,
            created_at TEXT,
            modified_by TEXT,
            modified_at TEXT
        );

        CREATE TABLE IF NOT EXISTS canister_slot (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canister_batch_id INTEGER NOT NULL
                REFERENCES canister_batch(id) ON DELETE CASCADE,
            canister_slot_no INTEGER NOT NULL,
            slot_id INTEGER NOT NULL,
            drop_number INTEGER,
            config_id INTEGER,
            quantity REAL NOT NULL,
            status TEXT NOT NULL,
            created_by TEXT,
            created_at TEXT,
            modified_by TEXT,
            modified_at TEXT
        );

        CREATE TABLE IF NOT EXISTS pack_analysis (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pack_id INTEGER NOT NULL,
            batch_id TEXT NOT NULL,
            manual_fill_required INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS pack_analysis_details (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            analysis_id INTEGER NOT NULL
                REFERENCES pack_analysis(id) ON DELETE CASCADE,
            slot_id INTEGER NOT NULL,
            fndc_txr TEXT NOT NULL,
            canister_id INTEGER,
            device_id INTEGER,
            quadrant INTEGER,
            drop_number INTEGER,
            config_id INTEGER
        );

        CREATE TABLE IF NOT EXISTS frequent_mfd_drug (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT NOT NULL,
            fndc_txr TEXT NOT NULL,
            total_quantity REAL,
            canister_count INTEGER,
            status TEXT,
            created_by TEXT,
            created_at TEXT,
            UNIQUE(batch_id, fndc_txr)
        );

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

/// 写入一条批次主档
#[allow(dead_code)]
pub fn seed_batch(
    db_path: &str,
    batch_id: &str,
    system_id: i64,
    company_id: i64,
    sequence_no: i64,
) -> Result<(), Box<dyn Error>> {
    let conn = Connection::open(db_path)?;
    conn.execute(
        r#"
        INSERT INTO batch_master (batch_id, system_id, company_id, batch_name, sequence_no)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![batch_id, system_id, company_id, "测试批次", sequence_no],
    )?;
    Ok(())
}

/// 写入一条全局配置
#[allow(dead_code)]
pub fn seed_config(db_path: &str, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
    let conn = Connection::open(db_path)?;
    conn.execute(
        r#"
        INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
        ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value
        "#,
        params![key, value],
    )?;
    Ok(())
}
