// ==========================================
// MFD 加药推荐系统 - 需求树领域模型
// ==========================================
// 职责: 病人->药盒->列->落次->槽位 的手工加药需求树与配套索引
// 红线: 纯数据结构, 构建逻辑在 engine::demand_builder, 分配逻辑在 engine
// ==========================================

use crate::domain::types::{
    ColumnId, ConfigId, DeviceId, DropNumber, PackId, PatientId, Quadrant, QuadrantId, SlotId,
    SlotNumber,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ==========================================
// SlotAssignment - 槽位分配状态
// ==========================================
/// 单个槽位在需求树中的象限分配状态
///
/// `quadrant` 初始为 None, 由象限分配器回填;
/// `quad_configs` 记录槽位可用的 象限->配置号 候选表, 多于一条即为多象限槽位。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub quadrant: Option<Quadrant>,                 // 已解析象限 (分配器回填)
    pub quad_configs: BTreeMap<Quadrant, ConfigId>, // 象限 -> 配置号 候选表
}

impl SlotAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否存在多个象限候选 (需要分配器第二遍收敛)
    pub fn is_multi_quadrant(&self) -> bool {
        self.quad_configs.len() > 1
            || self
                .quad_configs
                .keys()
                .any(|q| q.is_combined())
    }

    /// 候选象限集 (展开所有组合键的成员)
    pub fn candidate_quadrants(&self) -> BTreeSet<QuadrantId> {
        self.quad_configs
            .keys()
            .flat_map(|q| q.members())
            .collect()
    }

    /// 查询指定象限对应的配置号
    ///
    /// # 返回
    /// - 优先取包含该象限的候选键 (组合键按成员匹配)
    /// - 无匹配返回 None
    pub fn config_for(&self, quad: QuadrantId) -> Option<ConfigId> {
        self.quad_configs
            .iter()
            .find(|(key, _)| key.contains(quad))
            .map(|(_, config_id)| *config_id)
    }
}

// ==========================================
// ColumnDemand - 列级需求
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnDemand {
    /// 落次 -> 槽位 -> 分配状态
    pub drops: BTreeMap<DropNumber, BTreeMap<SlotNumber, SlotAssignment>>,
}

// ==========================================
// PackDemand / PatientDemand
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackDemand {
    /// 列 -> 列级需求
    pub columns: BTreeMap<ColumnId, ColumnDemand>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientDemand {
    /// 药盒 -> 药盒级需求
    pub packs: BTreeMap<PackId, PackDemand>,
}

// ==========================================
// BatchDemand - 批次需求全景
// ==========================================
/// 一次推荐运行的全部输入需求
///
/// 由需求构建器一次性产出, 分配器/装夹器在其上就地回填象限,
/// 持久化完成后整体丢弃。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchDemand {
    /// 病人 -> 需求树
    pub patients: BTreeMap<PatientId, PatientDemand>,
    /// 设备 -> 病人处理顺序 (上游给定, 决定容量计数的推进次序)
    pub device_patient_order: BTreeMap<DeviceId, Vec<PatientId>>,
    /// 设备 -> 该设备承接的药盒集
    pub device_packs: BTreeMap<DeviceId, BTreeSet<PackId>>,
    /// 药盒 -> 槽位 -> 按落药顺序排列的 (药品, 数量) 列表
    pub pack_slot_quantities: BTreeMap<PackId, BTreeMap<SlotNumber, Vec<(String, f64)>>>,
    /// 药盒 -> 药品 -> 槽位 -> slot_id (持久化专用句柄)
    pub slot_identity: BTreeMap<PackId, BTreeMap<String, BTreeMap<SlotNumber, SlotId>>>,
    /// 病人 -> 药盒 -> 列 -> 全手工槽位集 (第一遍分配的工作集)
    pub manual_slots: BTreeMap<PatientId, BTreeMap<PackId, BTreeMap<ColumnId, BTreeSet<SlotNumber>>>>,
    /// 药盒 -> 槽位 -> 药品全集 (自动+手工, 自动对账的工作清单)
    pub pack_slot_drugs: BTreeMap<PackId, BTreeMap<SlotNumber, BTreeSet<String>>>,
}

impl BatchDemand {
    pub fn new() -> Self {
        Self::default()
    }

    /// 批次是否无任何手工加药需求
    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
            || self
                .pack_slot_quantities
                .values()
                .all(|slots| slots.is_empty())
    }

    /// 查询槽位号对应的 slot_id
    pub fn slot_id_of(&self, pack_id: PackId, fndc_txr: &str, slot: SlotNumber) -> Option<SlotId> {
        self.slot_identity
            .get(&pack_id)
            .and_then(|drugs| drugs.get(fndc_txr))
            .and_then(|slots| slots.get(&slot))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_assignment_multi_quadrant() {
        let mut assignment = SlotAssignment::new();
        assignment.quad_configs.insert(Quadrant::single(2), 2);
        assert!(!assignment.is_multi_quadrant());

        assignment.quad_configs.insert(Quadrant::single(3), 3);
        assert!(assignment.is_multi_quadrant());
        assert_eq!(
            assignment.candidate_quadrants(),
            [2, 3].into_iter().collect()
        );
    }

    #[test]
    fn test_slot_assignment_combined_key_is_multi() {
        let mut assignment = SlotAssignment::new();
        assignment
            .quad_configs
            .insert(Quadrant::combined([1, 4]), 2);
        assert!(assignment.is_multi_quadrant());
        assert_eq!(assignment.config_for(4), Some(2));
        assert_eq!(assignment.config_for(2), None);
    }

    #[test]
    fn test_batch_demand_empty() {
        let demand = BatchDemand::new();
        assert!(demand.is_empty());
    }

    #[test]
    fn test_slot_id_lookup() {
        let mut demand = BatchDemand::new();
        demand
            .slot_identity
            .entry(100)
            .or_default()
            .entry("111*222".to_string())
            .or_default()
            .insert(10, 910);
        assert_eq!(demand.slot_id_of(100, "111*222", 10), Some(910));
        assert_eq!(demand.slot_id_of(100, "111*222", 11), None);
        assert_eq!(demand.slot_id_of(100, "333*444", 10), None);
    }
}
