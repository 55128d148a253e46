// ==========================================
// MFD 加药推荐系统 - 需求构建器
// ==========================================
// 职责: 把上游需求行规整为 BatchDemand (需求树 + 数量表 + 身份表)
// 红线: 纯转换, 无副作用, 不做象限决策
// ==========================================

use crate::domain::demand::{BatchDemand, SlotAssignment};
use crate::provider::batch_data_reader::BatchDemandRows;
use tracing::instrument;

// ==========================================
// DemandBuilder - 需求构建器
// ==========================================
pub struct DemandBuilder {
    // 无状态引擎，不需要注入依赖
}

impl DemandBuilder {
    pub fn new() -> Self {
        Self {}
    }

    /// 构建批次需求全景
    ///
    /// 规则:
    /// 1) 手工需求行进需求树; 全手工槽位象限置空并登记 manual_slots
    /// 2) 预标注行把 (象限, 配置号) 收进槽位候选表
    /// 3) 数量表保持药品首现顺序, 重复 (药盒, 槽位, 药品) 行累加数量
    /// 4) 自动登记行只喂身份表与全量药品清单
    /// 5) 零量行直接丢弃
    #[instrument(skip(self, rows), fields(
        demand_rows = rows.demand_rows.len(),
        auto_rows = rows.auto_rows.len()
    ))]
    pub fn build(&self, rows: BatchDemandRows) -> BatchDemand {
        let mut demand = BatchDemand::new();
        demand.device_patient_order = rows.device_patient_order;
        demand.device_packs = rows.device_packs;

        for row in rows.demand_rows {
            if row.quantity <= 0.0 {
                continue;
            }

            // 需求树叶子
            let assignment = demand
                .patients
                .entry(row.patient_id)
                .or_default()
                .packs
                .entry(row.pack_id)
                .or_default()
                .columns
                .entry(row.column)
                .or_default()
                .drops
                .entry(row.drop_number)
                .or_default()
                .entry(row.slot_number)
                .or_insert_with(SlotAssignment::new);

            // 无标注的非手工行按全手工兜底, 否则该槽位两遍分配都不会碰它
            if row.manual || row.quadrant.is_none() {
                assignment.quadrant = None;
                demand
                    .manual_slots
                    .entry(row.patient_id)
                    .or_default()
                    .entry(row.pack_id)
                    .or_default()
                    .entry(row.column)
                    .or_default()
                    .insert(row.slot_number);
            } else if let Some(quadrant) = row.quadrant.clone() {
                if assignment.quadrant.is_none() {
                    assignment.quadrant = Some(quadrant.clone());
                }
                if let Some(config_id) = row.config_id {
                    assignment.quad_configs.insert(quadrant, config_id);
                }
            }

            // 数量表: 首现顺序 + 同药累加
            let drugs = demand
                .pack_slot_quantities
                .entry(row.pack_id)
                .or_default()
                .entry(row.slot_number)
                .or_default();
            match drugs.iter_mut().find(|(fndc, _)| fndc == &row.fndc_txr) {
                Some((_, quantity)) => *quantity += row.quantity,
                None => drugs.push((row.fndc_txr.clone(), row.quantity)),
            }

            // 身份表与全量药品清单
            demand
                .slot_identity
                .entry(row.pack_id)
                .or_default()
                .entry(row.fndc_txr.clone())
                .or_default()
                .insert(row.slot_number, row.slot_id);
            demand
                .pack_slot_drugs
                .entry(row.pack_id)
                .or_default()
                .entry(row.slot_number)
                .or_default()
                .insert(row.fndc_txr);
        }

        for row in rows.auto_rows {
            demand
                .slot_identity
                .entry(row.pack_id)
                .or_default()
                .entry(row.fndc_txr.clone())
                .or_default()
                .insert(row.slot_number, row.slot_id);
            demand
                .pack_slot_drugs
                .entry(row.pack_id)
                .or_default()
                .entry(row.slot_number)
                .or_default()
                .insert(row.fndc_txr);
        }

        demand
    }
}

impl Default for DemandBuilder {
    fn default() -> Self {
        Self::new()
    }
}
