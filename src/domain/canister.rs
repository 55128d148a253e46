// ==========================================
// MFD 加药推荐系统 - 弹夹分配领域模型
// ==========================================
// 职责: 推荐运行的产出实体(弹夹批/弹夹槽/自动对账行)与设备弹夹索引
// 红线: 持久化列名对齐 schema, 引擎内只改内存, 落库统一走 repository
// ==========================================

use crate::domain::types::{
    ConfigId, DeviceId, DropNumber, PackId, PatientId, Quadrant, QuadrantId, SlotId, SlotNumber,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ==========================================
// CanisterSlot - 弹夹槽明细
// ==========================================
/// 弹夹批内的一条药品明细
///
/// 同一内部位置 (canister_slot_no) 上的多种药各占一行, 共享位置号。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanisterSlot {
    pub canister_slot_no: u8,        // 批内位置 1..=4
    pub pack_id: PackId,             // 来源药盒
    pub slot_number: SlotNumber,     // 来源槽位号
    pub slot_id: SlotId,             // 持久化句柄
    pub drop_number: DropNumber,     // 落次
    pub fndc_txr: String,            // 药品标识
    pub quantity: f64,               // 本行分得数量
    pub config_id: Option<ConfigId>, // 落药配置号
}

// ==========================================
// CanisterBatch - 弹夹批
// ==========================================
/// 一个待加药的弹夹: 最多 4 个内部位置, 目的地唯一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanisterBatch {
    pub order_no: i64,                   // 运行内弹夹序号
    pub patient_id: PatientId,           // 需求归属病人
    pub dest_device_id: DeviceId,        // 目的设备
    pub dest_quadrant: Quadrant,         // 目的象限 (组合象限落库时展开)
    pub slots: Vec<CanisterSlot>,        // 明细行
    pub assigned_operator: Option<i64>,  // 分工结果 (均衡器回填)
}

impl CanisterBatch {
    pub fn new(
        order_no: i64,
        patient_id: PatientId,
        dest_device_id: DeviceId,
        dest_quadrant: Quadrant,
    ) -> Self {
        Self {
            order_no,
            patient_id,
            dest_device_id,
            dest_quadrant,
            slots: Vec::new(),
            assigned_operator: None,
        }
    }

    /// 已占用的内部位置数 (多药共位只计一次)
    pub fn position_count(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| slot.canister_slot_no)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// 批内全部明细的数量合计
    pub fn total_quantity(&self) -> f64 {
        self.slots.iter().map(|slot| slot.quantity).sum()
    }

    /// 批内涉及的 slot_id 集
    pub fn slot_ids(&self) -> BTreeSet<SlotId> {
        self.slots.iter().map(|slot| slot.slot_id).collect()
    }
}

// ==========================================
// AutoFillResolution - 自动对账行
// ==========================================
/// 自动落药路径的单条 (药盒, 槽位, 药品) 解析结果
///
/// 全空字段表示"设备无法自动覆盖, 仍需人工处理"。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoFillResolution {
    pub pack_id: PackId,
    pub slot_id: SlotId,
    pub fndc_txr: String,
    pub canister_id: Option<i64>,
    pub device_id: Option<DeviceId>,
    pub quadrant: Option<QuadrantId>,
    pub drop_number: Option<DropNumber>,
    pub config_id: Option<ConfigId>,
}

impl AutoFillResolution {
    /// 构造"待人工"空行
    pub fn unresolved(pack_id: PackId, slot_id: SlotId, fndc_txr: &str) -> Self {
        Self {
            pack_id,
            slot_id,
            fndc_txr: fndc_txr.to_string(),
            canister_id: None,
            device_id: None,
            quadrant: None,
            drop_number: None,
            config_id: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.canister_id.is_some()
    }
}

// ==========================================
// DeviceCanisterIndex - 设备弹夹索引
// ==========================================
/// 单台设备上 象限->药品->弹夹 的在架索引 (自动路径输入)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCanisterIndex {
    /// 象限 -> 在架药品集
    pub quadrant_drugs: BTreeMap<QuadrantId, BTreeSet<String>>,
    /// 象限 -> 药品 -> 弹夹号列表 (取第一个)
    pub quadrant_drug_canisters: BTreeMap<QuadrantId, BTreeMap<String, Vec<i64>>>,
    /// 设备全量在架药品集
    pub device_drugs: BTreeSet<String>,
    /// 药品 -> 需整排除自动路径的药盒集 (半片药)
    pub half_pill_packs: BTreeMap<String, BTreeSet<PackId>>,
}

impl DeviceCanisterIndex {
    pub fn drug_on_device(&self, fndc_txr: &str) -> bool {
        self.device_drugs.contains(fndc_txr)
    }

    pub fn quadrant_has_drug(&self, quad: QuadrantId, fndc_txr: &str) -> bool {
        self.quadrant_drugs
            .get(&quad)
            .map(|drugs| drugs.contains(fndc_txr))
            .unwrap_or(false)
    }

    /// 象限内该药的首个弹夹号
    pub fn first_canister(&self, quad: QuadrantId, fndc_txr: &str) -> Option<i64> {
        self.quadrant_drug_canisters
            .get(&quad)
            .and_then(|drugs| drugs.get(fndc_txr))
            .and_then(|canisters| canisters.first())
            .copied()
    }

    pub fn is_half_pill(&self, fndc_txr: &str, pack_id: PackId) -> bool {
        self.half_pill_packs
            .get(fndc_txr)
            .map(|packs| packs.contains(&pack_id))
            .unwrap_or(false)
    }
}

// ==========================================
// RunOutput - 推荐运行累计产出
// ==========================================
/// 编排器跨设备累计的全部产出, 交给均衡器与写入器
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub canister_batches: Vec<CanisterBatch>,
    pub auto_resolutions: Vec<AutoFillResolution>,
    /// 本次重算覆盖的药盒集 (写入器先清其旧分析行)
    pub recomputed_packs: BTreeSet<PackId>,
    /// 手工弹夹覆盖的 slot_id 集 (写入器清理对应分析明细)
    pub mfd_slot_ids: BTreeSet<SlotId>,
}

impl RunOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// 病人 -> 弹夹批数
    pub fn per_patient_batch_counts(&self) -> BTreeMap<PatientId, i64> {
        let mut counts: BTreeMap<PatientId, i64> = BTreeMap::new();
        for batch in &self.canister_batches {
            *counts.entry(batch.patient_id).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_slot(no: u8, qty: f64) -> CanisterSlot {
        CanisterSlot {
            canister_slot_no: no,
            pack_id: 1,
            slot_number: 10,
            slot_id: 100,
            drop_number: 1,
            fndc_txr: "12345*6789".to_string(),
            quantity: qty,
            config_id: Some(2),
        }
    }

    #[test]
    fn test_position_count_shared_position() {
        let mut batch = CanisterBatch::new(1, 7, 3, Quadrant::single(2));
        batch.slots.push(make_slot(1, 2.0));
        batch.slots.push(make_slot(1, 1.5));
        batch.slots.push(make_slot(2, 4.0));
        // 位置1上两种药只算一个位置
        assert_eq!(batch.position_count(), 2);
        assert!((batch.total_quantity() - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_device_index_lookup() {
        let mut index = DeviceCanisterIndex::default();
        index
            .quadrant_drugs
            .entry(2)
            .or_default()
            .insert("111*222".to_string());
        index
            .quadrant_drug_canisters
            .entry(2)
            .or_default()
            .insert("111*222".to_string(), vec![31, 44]);
        index.device_drugs.insert("111*222".to_string());

        assert!(index.drug_on_device("111*222"));
        assert!(index.quadrant_has_drug(2, "111*222"));
        assert!(!index.quadrant_has_drug(3, "111*222"));
        assert_eq!(index.first_canister(2, "111*222"), Some(31));
        assert_eq!(index.first_canister(3, "111*222"), None);
    }

    #[test]
    fn test_run_output_patient_counts() {
        let mut output = RunOutput::new();
        output
            .canister_batches
            .push(CanisterBatch::new(1, 7, 3, Quadrant::single(1)));
        output
            .canister_batches
            .push(CanisterBatch::new(2, 7, 3, Quadrant::single(2)));
        output
            .canister_batches
            .push(CanisterBatch::new(3, 9, 3, Quadrant::single(1)));
        let counts = output.per_patient_batch_counts();
        assert_eq!(counts.get(&7), Some(&2));
        assert_eq!(counts.get(&9), Some(&1));
    }
}
