//! 交易缓存的初始化与迁移 - 由 refinery 管理
//!
//! 统一入口 `init_db`：pragmas → migrate → 版本校验。
//! 新增迁移只需在 migrations/ 添加 V{n}__{name}.sql，编译期自动嵌入。

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

use rusqlite::Connection;

use crate::error::{Result, SyncError};
use crate::version::STORE_DB_VERSION;

/// refinery 的 migration 历史表
const REFINERY_TABLE: &str = "refinery_schema_history";

/// 单写者缓存：WAL、NORMAL 同步、内存临时表
const STORE_PRAGMAS: &str = "
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA temp_store=MEMORY;
PRAGMA busy_timeout=5000;
";

pub fn enable_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(STORE_PRAGMAS.trim())
        .map_err(|e| SyncError::Database(format!("设置 PRAGMA 失败: {}", e)))?;
    Ok(())
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| SyncError::Migration(format!("执行 migration 失败: {}", e)))?;
    for migration in report.applied_migrations() {
        tracing::info!("📦 已应用 migration: {}", migration);
    }
    Ok(())
}

/// 当前数据库的 migration 版本；无表或空表返回 None
pub fn db_migration_version(conn: &Connection) -> Result<Option<i64>> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            [REFINERY_TABLE],
            |row| row.get(0),
        )
        .map_err(|e| SyncError::Database(format!("查询 {} 失败: {}", REFINERY_TABLE, e)))?;

    if !exists {
        return Ok(None);
    }

    let version: Option<i64> = conn
        .query_row(&format!("SELECT MAX(version) FROM {}", REFINERY_TABLE), [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .map_err(|e| SyncError::Database(format!("读取 migration 版本失败: {}", e)))?;

    Ok(version.filter(|&v| v > 0))
}

/// DB 版本高于本 crate 支持的最高版本时拒绝打开
pub fn check_db_version(conn: &Connection) -> Result<()> {
    let Some(v) = db_migration_version(conn)? else {
        return Ok(());
    };
    if v > STORE_DB_VERSION {
        return Err(SyncError::Database(format!(
            "交易缓存版本 {} 高于当前支持的最高版本 {}，请升级后再打开",
            v, STORE_DB_VERSION
        )));
    }
    Ok(())
}

pub fn init_db(conn: &mut Connection) -> Result<()> {
    enable_pragmas(conn)?;
    // 版本校验先于迁移：更新的 schema 不能被旧迁移触碰
    check_db_version(conn)?;
    run_migrations(conn)?;
    Ok(())
}
