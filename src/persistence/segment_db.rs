//! 分段进度 SQLite 存储
//!
//! - segment_info: 每个分段一行，按文件标识四元组索引

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use super::SegmentStore;
use crate::downloader::{DownloadState, FileKey, SegmentInfo};
use crate::error::DownloadError;

/// SQLite 分段存储
pub struct SqliteSegmentStore {
    /// SQLite 连接（互斥锁串行化写入）
    conn: Mutex<Connection>,
}

impl SqliteSegmentStore {
    /// 打开（或创建）数据库文件
    pub fn new(db_path: &Path) -> Result<Self, DownloadError> {
        // 确保父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DownloadError::Store(format!("创建数据库目录失败 {:?}: {}", parent, e))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        let store = Self::with_connection(conn)?;
        info!("分段数据库已打开: {:?}", db_path);
        Ok(store)
    }

    /// 内存数据库（测试用）
    pub fn in_memory() -> Result<Self, DownloadError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DownloadError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DownloadError> {
        self.conn
            .lock()
            .map_err(|e| DownloadError::Store(format!("获取数据库锁失败: {}", e)))
    }

    /// 初始化数据库表
    fn init_tables(&self) -> Result<(), DownloadError> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS segment_info (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                state TEXT NOT NULL,
                finished_bytes INTEGER NOT NULL DEFAULT 0,
                finished_time_millis INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                -- 文件标识四元组
                file_url TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                save_path TEXT NOT NULL,
                -- 字节区间（闭区间）
                start INTEGER NOT NULL,
                "end" INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_segment_info_key ON segment_info(file_url, file_name, file_size, save_path)",
            [],
        )?;

        debug!("segment_info 表初始化完成");
        Ok(())
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl SegmentStore for SqliteSegmentStore {
    fn save(&self, segment: &SegmentInfo) -> Result<i64, DownloadError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO segment_info (
                state, finished_bytes, finished_time_millis, created_at, updated_at,
                file_url, file_name, file_size, save_path, start, "end"
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                segment.state.as_str(),
                segment.finished_bytes as i64,
                segment.finished_time_millis as i64,
                segment.created_at,
                segment.updated_at,
                segment.key.file_url,
                segment.key.file_name,
                segment.key.file_size as i64,
                path_text(&segment.key.save_path),
                segment.start as i64,
                segment.end as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update(
        &self,
        id: i64,
        state: DownloadState,
        finished_bytes: u64,
        finished_time_millis: u64,
    ) -> Result<usize, DownloadError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE segment_info SET state = ?1, finished_bytes = ?2, finished_time_millis = ?3, updated_at = ?4 WHERE id = ?5",
            params![
                state.as_str(),
                finished_bytes as i64,
                finished_time_millis as i64,
                chrono::Utc::now().timestamp_millis(),
                id,
            ],
        )?;
        Ok(rows)
    }

    fn load_all(&self, key: &FileKey) -> Result<Vec<SegmentInfo>, DownloadError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                id, state, finished_bytes, finished_time_millis, created_at, updated_at,
                file_url, file_name, file_size, save_path, start, "end"
            FROM segment_info
            WHERE file_url = ?1 AND file_name = ?2 AND file_size = ?3 AND save_path = ?4
            ORDER BY start ASC
            "#,
        )?;

        let rows = stmt.query_map(
            params![
                key.file_url,
                key.file_name,
                key.file_size as i64,
                path_text(&key.save_path),
            ],
            |row| {
                let state: String = row.get(1)?;
                let save_path: String = row.get(9)?;
                Ok((
                    state,
                    SegmentInfo {
                        id: row.get(0)?,
                        key: FileKey {
                            file_url: row.get(6)?,
                            file_name: row.get(7)?,
                            file_size: row.get::<_, i64>(8)? as u64,
                            save_path: PathBuf::from(save_path),
                        },
                        start: row.get::<_, i64>(10)? as u64,
                        end: row.get::<_, i64>(11)? as u64,
                        state: DownloadState::New,
                        finished_bytes: row.get::<_, i64>(2)? as u64,
                        finished_time_millis: row.get::<_, i64>(3)? as u64,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    },
                ))
            },
        )?;

        let mut segments = Vec::new();
        for row in rows {
            let (state, mut segment) = row?;
            segment.state = match state.parse() {
                Ok(s) => s,
                Err(e) => {
                    warn!("分段 {} 状态无法识别，按暂停处理: {}", segment.id, e);
                    DownloadState::Paused
                }
            };
            segments.push(segment);
        }

        debug!("加载了 {} 个分段: {}", segments.len(), key.file_name);
        Ok(segments)
    }

    fn delete_all(&self, key: &FileKey) -> Result<usize, DownloadError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM segment_info WHERE file_url = ?1 AND file_name = ?2 AND file_size = ?3 AND save_path = ?4",
            params![
                key.file_url,
                key.file_name,
                key.file_size as i64,
                path_text(&key.save_path),
            ],
        )?;
        debug!("删除了 {} 个分段: {}", rows, key.file_name);
        Ok(rows)
    }
}
