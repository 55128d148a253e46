// ==========================================
// MFD 加药推荐系统 - 槽位象限拓扑
// ==========================================
// 职责: 静态硬件拓扑表(槽位 -> 可达象限集, 槽位/象限 -> 配置号)
// 红线: 只读查询, 不含容量计数(容量计数在 engine::session)
// ==========================================

use crate::domain::types::{ConfigId, QuadrantId, SlotNumber, ALL_QUADRANTS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ==========================================
// SlotTopology
// ==========================================
/// 槽位象限拓扑
///
/// 每个 slot_number 对应一组硬件可达象限; 满 4 象限的槽位视为"无约束"。
/// 配置号描述槽位在某象限落药时使用的物理配置, 算法内不解释其含义。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotTopology {
    /// 槽位 -> 可达象限集
    valid_quadrants: BTreeMap<SlotNumber, BTreeSet<QuadrantId>>,
    /// 槽位 -> 象限 -> 配置号
    slot_configs: BTreeMap<SlotNumber, BTreeMap<QuadrantId, ConfigId>>,
}

impl SlotTopology {
    pub fn new(
        valid_quadrants: BTreeMap<SlotNumber, BTreeSet<QuadrantId>>,
        slot_configs: BTreeMap<SlotNumber, BTreeMap<QuadrantId, ConfigId>>,
    ) -> Self {
        Self {
            valid_quadrants,
            slot_configs,
        }
    }

    /// 内置 28 槽位栅格的出厂拓扑
    ///
    /// 边缘槽位受机械臂行程限制只能由部分象限覆盖; 配置号缺省取象限编号。
    pub fn default_28_slot() -> Self {
        let mut valid_quadrants: BTreeMap<SlotNumber, BTreeSet<QuadrantId>> = BTreeMap::new();
        for slot in 1..=28i64 {
            let quads: BTreeSet<QuadrantId> = match slot {
                1..=6 => [2, 3].into_iter().collect(),
                7 => [3].into_iter().collect(),
                14 | 21 => [3, 4].into_iter().collect(),
                22..=27 => [1, 4].into_iter().collect(),
                28 => [4].into_iter().collect(),
                _ => ALL_QUADRANTS.into_iter().collect(),
            };
            valid_quadrants.insert(slot, quads);
        }

        let mut slot_configs: BTreeMap<SlotNumber, BTreeMap<QuadrantId, ConfigId>> =
            BTreeMap::new();
        for (slot, quads) in &valid_quadrants {
            let configs = quads
                .iter()
                .map(|q| (*q, ConfigId::from(*q)))
                .collect::<BTreeMap<_, _>>();
            slot_configs.insert(*slot, configs);
        }

        Self {
            valid_quadrants,
            slot_configs,
        }
    }

    /// 查询槽位的可达象限集
    ///
    /// # 返回
    /// - 拓扑中未登记的槽位视为无约束(四象限全可达)
    /// - 显式登记为空集的槽位原样返回空集(由分配器报缺口)
    pub fn valid_quadrants(&self, slot: SlotNumber) -> BTreeSet<QuadrantId> {
        match self.valid_quadrants.get(&slot) {
            Some(quads) => quads.clone(),
            None => ALL_QUADRANTS.into_iter().collect(),
        }
    }

    /// 槽位是否受硬件约束(可达象限数 < 4)
    pub fn is_constrained(&self, slot: SlotNumber) -> bool {
        self.valid_quadrants(slot).len() < 4
    }

    /// 查询槽位在指定象限的配置号
    pub fn config_id(&self, slot: SlotNumber, quad: QuadrantId) -> Option<ConfigId> {
        self.slot_configs
            .get(&slot)
            .and_then(|configs| configs.get(&quad))
            .copied()
    }
}

impl Default for SlotTopology {
    fn default() -> Self {
        Self::default_28_slot()
    }
}
