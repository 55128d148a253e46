// ==========================================
// MFD 加药推荐系统 - 推荐结果仓储
// ==========================================
// 职责: 把一次运行的全部产出 (弹夹批/弹夹槽/药盒分析/高频药登记)
//       在单个事务里落库, 重跑时先清后写实现整体替换
// 红线: 全部写入必须同一事务, 任何一步失败整体回滚
// ==========================================

use crate::domain::canister::{AutoFillResolution, RunOutput};
use crate::domain::types::{
    BatchMfdStatus, CanisterBatchStatus, CanisterSlotStatus, FrequentDrugStatus, PackId,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::info;

// ==========================================
// PersistStats - 落库统计
// ==========================================

#[derive(Debug, Clone, Default)]
pub struct PersistStats {
    /// 展开后的 canister_batch 头行数 (组合目的地按成员各写一行)
    pub batch_headers: usize,
    /// canister_slot 明细行数
    pub slot_rows: usize,
    /// pack_analysis_details 对账行数
    pub analysis_rows: usize,
}

// ==========================================
// RecommendationRepository - 推荐结果仓储
// ==========================================

pub struct RecommendationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RecommendationRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批次是否已有推荐结果
    pub fn rows_exist(&self, batch_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM canister_batch WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 落库一次完整推荐产出
    ///
    /// # 流程 (单事务)
    /// 1. 重算药盒先清旧分析行, 再按药盒写入自动对账头与明细
    /// 2. 手工弹夹覆盖的槽位从本批分析明细中剔除
    /// 3. 清掉批次旧弹夹 (明细行级联删除)
    /// 4. 写入弹夹头与明细, 组合目的地按成员展开且共用序号
    /// 5. 存在弹夹明细时推进批次 MFD 状态并刷新高频手工药登记
    ///
    /// # 红线
    /// - 全部写入必须同一事务
    pub fn persist_run(
        &self,
        batch_id: &str,
        user_id: &str,
        output: &RunOutput,
    ) -> RepositoryResult<PersistStats> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut stats = PersistStats::default();

        // 1. 重算药盒: 清旧分析行, 写新对账行
        for pack_id in &output.recomputed_packs {
            tx.execute(
                "DELETE FROM pack_analysis WHERE pack_id = ?1 AND batch_id = ?2",
                params![pack_id, batch_id],
            )?;
        }
        let mut rows_by_pack: BTreeMap<PackId, Vec<&AutoFillResolution>> = BTreeMap::new();
        for resolution in &output.auto_resolutions {
            rows_by_pack
                .entry(resolution.pack_id)
                .or_default()
                .push(resolution);
        }
        for (pack_id, rows) in rows_by_pack {
            tx.execute(
                r#"
                INSERT INTO pack_analysis (pack_id, batch_id, manual_fill_required)
                VALUES (?1, ?2, 1)
                "#,
                params![pack_id, batch_id],
            )?;
            let analysis_id = tx.last_insert_rowid();
            for row in rows {
                tx.execute(
                    r#"
                    INSERT INTO pack_analysis_details (
                        analysis_id, slot_id, fndc_txr,
                        canister_id, device_id, quadrant, drop_number, config_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        analysis_id,
                        row.slot_id,
                        row.fndc_txr,
                        row.canister_id,
                        row.device_id,
                        row.quadrant,
                        row.drop_number,
                        row.config_id,
                    ],
                )?;
                stats.analysis_rows += 1;
            }
        }

        // 2. 手工弹夹覆盖的槽位从本批分析明细中剔除
        for slot_id in &output.mfd_slot_ids {
            tx.execute(
                r#"
                DELETE FROM pack_analysis_details
                WHERE slot_id = ?1
                  AND analysis_id IN (SELECT id FROM pack_analysis WHERE batch_id = ?2)
                "#,
                params![slot_id, batch_id],
            )?;
        }

        // 3. 清掉批次旧弹夹 (canister_slot 级联删除)
        tx.execute(
            "DELETE FROM canister_batch WHERE batch_id = ?1",
            params![batch_id],
        )?;

        // 4. 写入弹夹头与明细, 组合目的地按成员展开
        for batch in &output.canister_batches {
            for member in batch.dest_quadrant.members() {
                tx.execute(
                    r#"
                    INSERT INTO canister_batch (
                        batch_id, order_no, dest_device_id, dest_quadrant,
                        status, assigned_operator, created_by, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now', 'localtime'))
                    "#,
                    params![
                        batch_id,
                        batch.order_no,
                        batch.dest_device_id,
                        member,
                        CanisterBatchStatus::Pending.to_db_str(),
                        batch.assigned_operator,
                        user_id,
                    ],
                )?;
                let header_id = tx.last_insert_rowid();
                stats.batch_headers += 1;
                for slot in &batch.slots {
                    tx.execute(
                        r#"
                        INSERT INTO canister_slot (
                            canister_batch_id, canister_slot_no, slot_id,
                            drop_number, config_id, quantity,
                            status, created_by, created_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now', 'localtime'))
                        "#,
                        params![
                            header_id,
                            slot.canister_slot_no,
                            slot.slot_id,
                            slot.drop_number,
                            slot.config_id,
                            slot.quantity,
                            CanisterSlotStatus::Pending.to_db_str(),
                            user_id,
                        ],
                    )?;
                    stats.slot_rows += 1;
                }
            }
        }

        // 5. 有弹夹明细时推进批次状态并刷新高频手工药登记
        if stats.slot_rows > 0 {
            tx.execute(
                r#"
                UPDATE batch_master
                SET mfd_status = ?1,
                    updated_at = datetime('now', 'localtime'),
                    updated_by = ?2
                WHERE batch_id = ?3
                "#,
                params![BatchMfdStatus::MfdPending.to_db_str(), user_id, batch_id],
            )?;

            tx.execute(
                "DELETE FROM frequent_mfd_drug WHERE batch_id = ?1",
                params![batch_id],
            )?;
            let mut drug_totals: BTreeMap<&str, (f64, BTreeSet<i64>)> = BTreeMap::new();
            for batch in &output.canister_batches {
                for slot in &batch.slots {
                    let entry = drug_totals
                        .entry(slot.fndc_txr.as_str())
                        .or_insert((0.0, BTreeSet::new()));
                    entry.0 += slot.quantity;
                    entry.1.insert(batch.order_no);
                }
            }
            for (fndc_txr, (total_quantity, batch_orders)) in drug_totals {
                tx.execute(
                    r#"
                    INSERT INTO frequent_mfd_drug (
                        batch_id, fndc_txr, total_quantity, canister_count,
                        status, created_by, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now', 'localtime'))
                    "#,
                    params![
                        batch_id,
                        fndc_txr,
                        total_quantity,
                        batch_orders.len() as i64,
                        FrequentDrugStatus::Pending.to_db_str(),
                        user_id,
                    ],
                )?;
            }
        }

        tx.commit()?;
        info!(
            batch_id = %batch_id,
            batch_headers = stats.batch_headers,
            slot_rows = stats.slot_rows,
            analysis_rows = stats.analysis_rows,
            "推荐结果落库完成"
        );
        Ok(stats)
    }
}
