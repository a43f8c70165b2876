//! 版本与构建元信息
//!
//! - **Crate Version** → Cargo.toml（唯一权威源）
//! - **Store Migration Version** → migrations 文件（文件即版本，由 refinery 自动管理）

/// crate semver，来自 Cargo.toml
pub const SYNC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（由 vergen 在 build.rs 中生成；非 git 环境下为 "unknown"）
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// 构建时间（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(ts) => ts,
    None => "unknown",
};

/// 当前 crate 支持的最高交易缓存 migration 版本（refinery_schema_history.version）。
/// 由 build.rs 扫描 migrations/ 下 V{version}__*.sql 取最大值生成。
/// 打开数据库时若 DB 版本高于此值则拒绝（防降级后 schema 不兼容）。
pub const STORE_DB_VERSION: i64 = parse_db_version(env!("STORE_DB_VERSION"));

/// 编译期解析版本号字符串（build.rs 只会输出纯数字）
const fn parse_db_version(s: &str) -> i64 {
    let b = s.as_bytes();
    let mut v = 0i64;
    let mut i = 0usize;
    while i < b.len() {
        if b[i] >= b'0' && b[i] <= b'9' {
            v = v * 10 + (b[i] - b'0') as i64;
        }
        i += 1;
    }
    v
}

/// 运行时版本信息（日志 / 诊断用）
pub fn version_line() -> String {
    format!("fanvue-sync {} ({}, built {})", SYNC_VERSION, GIT_SHA, BUILD_TIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_db_version_ignores_non_digits() {
        assert_eq!(parse_db_version("12"), 12);
        assert_eq!(parse_db_version(" 3\n"), 3);
        assert_eq!(parse_db_version(""), 0);
    }

    #[test]
    fn store_version_covers_initial_migration() {
        assert!(STORE_DB_VERSION >= 1);
        assert!(version_line().starts_with("fanvue-sync "));
    }
}
