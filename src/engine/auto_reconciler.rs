// ==========================================
// 自动落药对账引擎 (Auto Reconciler)
// ==========================================
// 职责: 弹夹分配完成后, 逐 (药盒, 槽位, 药品) 核对设备在架弹夹,
//       标注可自动落药的行, 覆盖不到的写空行留给人工
// 红线: 半片药药盒一律不走自动路径; 槽位归属以分配后的需求树为准
// ==========================================

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument, warn};

use crate::domain::canister::{AutoFillResolution, DeviceCanisterIndex};
use crate::domain::demand::{BatchDemand, SlotAssignment};
use crate::domain::types::{ConfigId, DeviceId, DropNumber, PackId, SlotNumber};

/// 槽位在分配后需求树中的落点快照
#[derive(Debug, Clone)]
struct SlotAnnotation {
    assignment: SlotAssignment,
    drop_number: DropNumber,
}

/// 自动落药对账引擎, 无状态
pub struct AutoReconciler;

impl AutoReconciler {
    pub fn new() -> Self {
        Self
    }

    /// 对单台设备的药盒做自动落药对账
    ///
    /// # 返回
    /// - 对账行列表 (可自动行带弹夹号, 不可自动行全空)
    /// - 产生过对账行的药盒集 (写入器据此重建分析行)
    #[instrument(skip(self, demand, index), fields(device_id = device_id))]
    pub fn reconcile_device(
        &self,
        demand: &BatchDemand,
        index: &DeviceCanisterIndex,
        device_id: DeviceId,
        device_packs: &BTreeSet<PackId>,
    ) -> (Vec<AutoFillResolution>, BTreeSet<PackId>) {
        let annotations = build_annotations(demand, device_packs);
        let mut resolutions = Vec::new();
        let mut covered_packs = BTreeSet::new();

        for (pack_id, slots) in &demand.pack_slot_drugs {
            let Some(pack_annotations) = annotations.get(pack_id) else {
                continue;
            };
            for (slot_number, drugs) in slots {
                for fndc_txr in drugs {
                    if index.is_half_pill(fndc_txr, *pack_id) {
                        continue;
                    }
                    let Some(slot_id) = demand.slot_id_of(*pack_id, fndc_txr, *slot_number) else {
                        warn!(
                            pack_id = pack_id,
                            slot_number = slot_number,
                            fndc_txr = %fndc_txr,
                            "缺少槽位标识, 对账行跳过"
                        );
                        continue;
                    };
                    covered_packs.insert(*pack_id);
                    if !index.drug_on_device(fndc_txr) {
                        resolutions.push(AutoFillResolution::unresolved(
                            *pack_id, slot_id, fndc_txr,
                        ));
                        continue;
                    }
                    let Some(annotation) = pack_annotations.get(slot_number) else {
                        resolutions.push(AutoFillResolution::unresolved(
                            *pack_id, slot_id, fndc_txr,
                        ));
                        continue;
                    };
                    resolutions.push(self.resolve_drug(
                        index, device_id, *pack_id, slot_id, fndc_txr, annotation,
                    ));
                }
            }
        }
        debug!(
            row_count = resolutions.len(),
            pack_count = covered_packs.len(),
            resolved = resolutions.iter().filter(|r| r.is_resolved()).count(),
            "设备自动对账完成"
        );
        (resolutions, covered_packs)
    }

    /// 单药对账: 多配置槽位按已收敛象限定点核对, 其余按成员序探测
    fn resolve_drug(
        &self,
        index: &DeviceCanisterIndex,
        device_id: DeviceId,
        pack_id: PackId,
        slot_id: i64,
        fndc_txr: &str,
        annotation: &SlotAnnotation,
    ) -> AutoFillResolution {
        let assignment = &annotation.assignment;
        if has_multiple_configs(assignment) {
            if let Some(quad) = assignment.quadrant.as_ref().and_then(|q| q.as_single()) {
                if !index.quadrant_has_drug(quad, fndc_txr) {
                    return AutoFillResolution::unresolved(pack_id, slot_id, fndc_txr);
                }
                return match index.first_canister(quad, fndc_txr) {
                    Some(canister_id) => full_resolution(
                        pack_id,
                        slot_id,
                        fndc_txr,
                        canister_id,
                        device_id,
                        quad,
                        annotation.drop_number,
                        assignment.config_for(quad),
                    ),
                    None => AutoFillResolution::unresolved(pack_id, slot_id, fndc_txr),
                };
            }
            // 未收敛的多配置槽位落入成员探测
        }
        let members = annotation
            .assignment
            .quadrant
            .as_ref()
            .map(|q| q.members())
            .unwrap_or_default();
        for member in members {
            if !index.quadrant_has_drug(member, fndc_txr) {
                continue;
            }
            return match index.first_canister(member, fndc_txr) {
                Some(canister_id) => full_resolution(
                    pack_id,
                    slot_id,
                    fndc_txr,
                    canister_id,
                    device_id,
                    member,
                    annotation.drop_number,
                    assignment.config_for(member),
                ),
                None => AutoFillResolution::unresolved(pack_id, slot_id, fndc_txr),
            };
        }
        AutoFillResolution::unresolved(pack_id, slot_id, fndc_txr)
    }
}

impl Default for AutoReconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// 槽位候选配置是否多于一个 (按去重后的配置号计)
fn has_multiple_configs(assignment: &SlotAssignment) -> bool {
    assignment
        .quad_configs
        .values()
        .collect::<BTreeSet<_>>()
        .len()
        > 1
}

#[allow(clippy::too_many_arguments)]
fn full_resolution(
    pack_id: PackId,
    slot_id: i64,
    fndc_txr: &str,
    canister_id: i64,
    device_id: DeviceId,
    quadrant: u8,
    drop_number: DropNumber,
    config_id: Option<ConfigId>,
) -> AutoFillResolution {
    AutoFillResolution {
        pack_id,
        slot_id,
        fndc_txr: fndc_txr.to_string(),
        canister_id: Some(canister_id),
        device_id: Some(device_id),
        quadrant: Some(quadrant),
        drop_number: Some(drop_number),
        config_id,
    }
}

/// 从分配后的需求树提取设备药盒的 槽位->落点 快照
fn build_annotations(
    demand: &BatchDemand,
    device_packs: &BTreeSet<PackId>,
) -> BTreeMap<PackId, BTreeMap<SlotNumber, SlotAnnotation>> {
    let mut annotations: BTreeMap<PackId, BTreeMap<SlotNumber, SlotAnnotation>> = BTreeMap::new();
    for patient in demand.patients.values() {
        for (pack_id, pack) in &patient.packs {
            if !device_packs.contains(pack_id) {
                continue;
            }
            for column in pack.columns.values() {
                for (drop_number, slots) in &column.drops {
                    for (slot_number, assignment) in slots {
                        annotations
                            .entry(*pack_id)
                            .or_default()
                            .entry(*slot_number)
                            .or_insert_with(|| SlotAnnotation {
                                assignment: assignment.clone(),
                                drop_number: *drop_number,
                            });
                    }
                }
            }
        }
    }
    annotations
}
