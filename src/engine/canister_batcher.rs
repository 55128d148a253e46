// ==========================================
// 弹夹组批引擎 (Canister Batcher)
// ==========================================
// 职责: 把分配完象限的需求树按 (药列, 目标象限) 分组, 拆分超量槽位,
//       再装配成最多 4 个仓位的弹夹批, 并通过会话计数器登记填充
// 红线: 不触达数据库; 不修改需求树; 数量只拆分不丢失
// ==========================================

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument, warn};

use crate::domain::canister::{CanisterBatch, CanisterSlot};
use crate::domain::demand::{BatchDemand, SlotAssignment};
use crate::domain::types::{
    ColumnId, ConfigId, DeviceId, DropNumber, PackId, PatientId, Quadrant, SlotNumber,
};
use crate::engine::session::RecommendationSession;

/// 弹夹批最多容纳的仓位数, 结构上限
pub const MAX_BATCH_POSITIONS: usize = 4;

/// 拆分后的槽位条目: 一个条目占用一个仓位
#[derive(Debug, Clone)]
struct SlotEntry {
    pack_id: PackId,
    slot_number: SlotNumber,
    drop_number: DropNumber,
    /// 本仓位内各药的数量份额
    portions: Vec<(String, f64)>,
    config_id: Option<ConfigId>,
}

/// 弹夹组批引擎
///
/// 无状态, 输入为某病人在某设备上的分配后需求树,
/// 输出为带仓位明细的弹夹批列表.
pub struct CanisterBatcher {
    /// 单仓位最大药量, 超出则拆分成多个仓位
    max_per_position: i64,
}

impl CanisterBatcher {
    pub fn new(max_per_position: i64) -> Self {
        Self {
            max_per_position: max_per_position.max(1),
        }
    }

    /// 为单个病人在单台设备上构建弹夹批
    ///
    /// # 流程
    /// 1. 按 (药列, 目标象限) 收集条目, 超量槽位先做数量拆分
    /// 2. 双药包单槽位场景走交错合批, 避免产生两个稀疏批
    /// 3. 其余按序装配, 满 4 仓位或跨药包时封批
    /// 4. 每封一批向会话登记一次象限填充并领取批次序号
    #[instrument(skip(self, demand, session), fields(patient_id = patient_id, device_id = device_id))]
    pub fn build_patient_batches(
        &self,
        demand: &BatchDemand,
        session: &mut RecommendationSession,
        patient_id: PatientId,
        device_id: DeviceId,
        device_packs: &BTreeSet<PackId>,
    ) -> Vec<CanisterBatch> {
        let groups = self.collect_groups(demand, patient_id, device_packs);
        if groups.is_empty() {
            return Vec::new();
        }

        let pack_count = demand
            .patients
            .get(&patient_id)
            .map(|p| p.packs.len())
            .unwrap_or(0);

        let mut batches = Vec::new();
        for ((column, dest), entries) in groups {
            if entries.is_empty() {
                continue;
            }
            if self.is_shared_batch_case(&entries, pack_count) {
                let interleaved = interleave_two_packs(entries);
                let batch = self.assemble_single_batch(
                    demand,
                    session,
                    patient_id,
                    device_id,
                    &dest,
                    &interleaved,
                );
                debug!(
                    column = column,
                    dest = %dest,
                    positions = batch.position_count(),
                    "双药包交错合批"
                );
                batches.push(batch);
            } else {
                self.assemble_batches(
                    demand,
                    session,
                    patient_id,
                    device_id,
                    &dest,
                    &entries,
                    &mut batches,
                );
            }
        }
        debug!(batch_count = batches.len(), "病人组批完成");
        batches
    }

    /// 收集 (药列, 目标象限) 分组, 条目顺序为药包升序内的滴次升序, 槽位升序
    fn collect_groups(
        &self,
        demand: &BatchDemand,
        patient_id: PatientId,
        device_packs: &BTreeSet<PackId>,
    ) -> BTreeMap<(ColumnId, Quadrant), Vec<SlotEntry>> {
        let mut groups: BTreeMap<(ColumnId, Quadrant), Vec<SlotEntry>> = BTreeMap::new();
        let Some(patient) = demand.patients.get(&patient_id) else {
            return groups;
        };
        for (pack_id, pack) in &patient.packs {
            if !device_packs.contains(pack_id) {
                continue;
            }
            for (column, column_demand) in &pack.columns {
                for (drop_number, slots) in &column_demand.drops {
                    for (slot_number, assignment) in slots {
                        let Some(dest) = assignment.quadrant.clone() else {
                            // 分配遍结束后不应再有未定槽位
                            warn!(
                                pack_id = pack_id,
                                slot_number = slot_number,
                                "槽位缺少目标象限, 跳过组批"
                            );
                            continue;
                        };
                        let Some(drugs) = demand
                            .pack_slot_quantities
                            .get(pack_id)
                            .and_then(|slots| slots.get(slot_number))
                        else {
                            continue;
                        };
                        let config_id = config_for_destination(assignment, &dest);
                        for portions in self.split_slot_quantity(drugs) {
                            groups.entry((*column, dest.clone())).or_default().push(
                                SlotEntry {
                                    pack_id: *pack_id,
                                    slot_number: *slot_number,
                                    drop_number: *drop_number,
                                    portions,
                                    config_id,
                                },
                            );
                        }
                    }
                }
            }
        }
        groups
    }

    /// 槽位数量拆分
    ///
    /// 总量超出单仓位上限时拆成 `ceil(总量 / 上限)` 份,
    /// 每份目标量为 `ceil(总量 / 份数)`, 保证各份尽量均匀.
    /// 整药优先整份放入, 放不下的药拆出部分量并顺延到下一份.
    fn split_slot_quantity(&self, drugs: &[(String, f64)]) -> Vec<Vec<(String, f64)>> {
        let total: f64 = drugs.iter().map(|(_, qty)| qty).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        let parts = (total / self.max_per_position as f64).ceil().max(1.0) as usize;
        let ideal = (total / parts as f64).ceil();

        let mut remaining: Vec<(String, f64)> = drugs.to_vec();
        let mut result = Vec::with_capacity(parts);
        let mut total_filled = 0.0_f64;
        for _ in 0..parts {
            let mut filled = 0.0_f64;
            let mut portions: Vec<(String, f64)> = Vec::new();
            for (drug, qty) in remaining.iter_mut() {
                if *qty <= 0.0 {
                    continue;
                }
                let take = if *qty + filled <= ideal {
                    *qty
                } else {
                    ideal - filled
                };
                if take <= 0.0 {
                    continue;
                }
                *qty -= take;
                filled += take;
                total_filled += take;
                portions.push((drug.clone(), take));
                if filled >= ideal || total_filled >= total - f64::EPSILON {
                    break;
                }
            }
            if !portions.is_empty() {
                result.push(portions);
            }
        }
        result
    }

    /// 双药包交错合批条件:
    /// 病人恰有两个药包, 两包都出现在本分组, 每包只覆盖一个槽位,
    /// 且条目总数不超过一批容量
    fn is_shared_batch_case(&self, entries: &[SlotEntry], pack_count: usize) -> bool {
        if pack_count != 2 || entries.len() > MAX_BATCH_POSITIONS {
            return false;
        }
        let mut pack_slots: BTreeMap<PackId, BTreeSet<SlotNumber>> = BTreeMap::new();
        for entry in entries {
            pack_slots
                .entry(entry.pack_id)
                .or_default()
                .insert(entry.slot_number);
        }
        pack_slots.len() == 2 && pack_slots.values().all(|slots| slots.len() == 1)
    }

    /// 顺序装配: 满 4 仓位或条目跨药包时封批
    #[allow(clippy::too_many_arguments)]
    fn assemble_batches(
        &self,
        demand: &BatchDemand,
        session: &mut RecommendationSession,
        patient_id: PatientId,
        device_id: DeviceId,
        dest: &Quadrant,
        entries: &[SlotEntry],
        batches: &mut Vec<CanisterBatch>,
    ) {
        let mut current: Vec<&SlotEntry> = Vec::new();
        let mut current_pack: Option<PackId> = None;
        for entry in entries {
            let pack_changed = current_pack.is_some_and(|p| p != entry.pack_id);
            if pack_changed || current.len() == MAX_BATCH_POSITIONS {
                if !current.is_empty() {
                    batches.push(self.close_batch(
                        demand, session, patient_id, device_id, dest, &current,
                    ));
                    current.clear();
                }
            }
            current_pack = Some(entry.pack_id);
            current.push(entry);
        }
        if !current.is_empty() {
            batches.push(self.close_batch(demand, session, patient_id, device_id, dest, &current));
        }
    }

    /// 交错条目直接装成一批
    fn assemble_single_batch(
        &self,
        demand: &BatchDemand,
        session: &mut RecommendationSession,
        patient_id: PatientId,
        device_id: DeviceId,
        dest: &Quadrant,
        entries: &[SlotEntry],
    ) -> CanisterBatch {
        let refs: Vec<&SlotEntry> = entries.iter().collect();
        self.close_batch(demand, session, patient_id, device_id, dest, &refs)
    }

    /// 封批: 生成仓位明细, 登记象限填充, 领取序号
    fn close_batch(
        &self,
        demand: &BatchDemand,
        session: &mut RecommendationSession,
        patient_id: PatientId,
        device_id: DeviceId,
        dest: &Quadrant,
        entries: &[&SlotEntry],
    ) -> CanisterBatch {
        let order_no = session.take_order_no();
        let mut batch = CanisterBatch::new(order_no, patient_id, device_id, dest.clone());
        for (index, entry) in entries.iter().enumerate() {
            let canister_slot_no = (index + 1) as u8;
            for (fndc_txr, quantity) in &entry.portions {
                let Some(slot_id) =
                    demand.slot_id_of(entry.pack_id, fndc_txr, entry.slot_number)
                else {
                    warn!(
                        pack_id = entry.pack_id,
                        slot_number = entry.slot_number,
                        fndc_txr = %fndc_txr,
                        "缺少槽位标识, 明细行跳过"
                    );
                    continue;
                };
                batch.slots.push(CanisterSlot {
                    canister_slot_no,
                    pack_id: entry.pack_id,
                    slot_number: entry.slot_number,
                    slot_id,
                    drop_number: entry.drop_number,
                    fndc_txr: fndc_txr.clone(),
                    quantity: *quantity,
                    config_id: entry.config_id,
                });
            }
        }
        session.record_fill(dest);
        batch
    }
}

impl Default for CanisterBatcher {
    fn default() -> Self {
        Self::new(4)
    }
}

/// 目标象限对应的配置号: 优先取完全匹配的键, 其次取含任一成员的键
fn config_for_destination(assignment: &SlotAssignment, dest: &Quadrant) -> Option<ConfigId> {
    if let Some(config_id) = assignment.quad_configs.get(dest) {
        return Some(*config_id);
    }
    dest.members()
        .iter()
        .find_map(|member| assignment.config_for(*member))
}

/// 两个药包的条目按药包号升序交错排列
fn interleave_two_packs(entries: Vec<SlotEntry>) -> Vec<SlotEntry> {
    let mut by_pack: BTreeMap<PackId, Vec<SlotEntry>> = BTreeMap::new();
    for entry in entries {
        by_pack.entry(entry.pack_id).or_default().push(entry);
    }
    let mut lists: Vec<std::vec::IntoIter<SlotEntry>> =
        by_pack.into_values().map(|v| v.into_iter()).collect();
    let mut result = Vec::new();
    loop {
        let mut advanced = false;
        for list in lists.iter_mut() {
            if let Some(entry) = list.next() {
                result.push(entry);
                advanced = true;
            }
        }
        if !advanced {
            break;
        }
    }
    result
}
