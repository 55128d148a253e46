// ==========================================
// MFD 加药推荐系统 - 批次主档仓储
// ==========================================
// 职责: batch_master 的读取, 推荐阶段序列认领/恢复/完成, MFD 状态推进
// 红线: 认领必须走条件更新, 靠行数判定是否抢到, 不得先读后写分两步
// ==========================================

use crate::domain::types::{
    BatchMfdStatus, SEQ_MFD_RECOMMENDATION_DONE, SEQ_MFD_RECOMMENDATION_IN_PROGRESS,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// BatchMaster - 批次主档实体
// ==========================================

#[derive(Debug, Clone)]
pub struct BatchMaster {
    pub batch_id: String,
    pub system_id: i64,
    pub company_id: i64,
    pub batch_name: String,
    pub sequence_no: i64,
    pub mfd_status: Option<BatchMfdStatus>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

// ==========================================
// BatchMasterRepository - 批次主档仓储
// ==========================================

pub struct BatchMasterRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchMasterRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, batch_id: &str) -> RepositoryResult<Option<BatchMaster>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT batch_id, system_id, company_id, batch_name, sequence_no, mfd_status,
                   created_at, updated_at
            FROM batch_master
            WHERE batch_id = ?1
            "#,
        )?;

        match stmt.query_row(params![batch_id], |row| {
            let mfd_status_str: Option<String> = row.get(5)?;
            Ok(BatchMaster {
                batch_id: row.get(0)?,
                system_id: row.get(1)?,
                company_id: row.get(2)?,
                batch_name: row.get(3)?,
                sequence_no: row.get(4)?,
                mfd_status: mfd_status_str.as_deref().and_then(BatchMfdStatus::from_str),
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        }) {
            Ok(batch) => Ok(Some(batch)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 认领批次进入推荐阶段
    ///
    /// # 返回
    /// - `Ok(Some(previous))`: 认领成功, 返回认领前的序列值 (失败回滚用)
    /// - `Ok(None)`: 批次已被其他运行认领
    ///
    /// # 红线
    /// - 读旧值与条件更新必须同一事务
    pub fn claim_recommendation(&self, batch_id: &str) -> RepositoryResult<Option<i64>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        // 1. 读取认领前序列值
        let previous: i64 = match tx.query_row(
            "SELECT sequence_no FROM batch_master WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        ) {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(RepositoryError::NotFound {
                    entity: "batch_master".to_string(),
                    id: batch_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        // 2. 条件认领: 已处于推荐中的批次不得重复认领
        let rows = tx.execute(
            r#"
            UPDATE batch_master
            SET sequence_no = ?1,
                updated_at = datetime('now', 'localtime')
            WHERE batch_id = ?2
              AND sequence_no != ?1
            "#,
            params![SEQ_MFD_RECOMMENDATION_IN_PROGRESS, batch_id],
        )?;

        tx.commit()?;
        if rows == 0 {
            Ok(None)
        } else {
            Ok(Some(previous))
        }
    }

    /// 恢复认领前的序列值 (运行失败或无需执行时回退)
    pub fn restore_sequence(&self, batch_id: &str, sequence_no: i64) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE batch_master
            SET sequence_no = ?1,
                updated_at = datetime('now', 'localtime')
            WHERE batch_id = ?2
            "#,
            params![sequence_no, batch_id],
        )?;
        Ok(rows)
    }

    /// 推荐完成, 序列推进到完成值
    pub fn complete_recommendation(
        &self,
        batch_id: &str,
        user_id: &str,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE batch_master
            SET sequence_no = ?1,
                updated_at = datetime('now', 'localtime'),
                updated_by = ?2
            WHERE batch_id = ?3
            "#,
            params![SEQ_MFD_RECOMMENDATION_DONE, user_id, batch_id],
        )?;
        Ok(rows)
    }
}
