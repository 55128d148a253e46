// ==========================================
// MFD 加药推荐系统 - 运行编排器
// ==========================================
// 用途: 按 设备 -> 病人 顺序协调象限分配 / 弹夹组批 / 自动对账,
//       跨设备累计产出后统一做操作员分工
// 红线: 容量计数按设备隔离; 弹夹序号跨设备连续递增
// ==========================================

use crate::domain::canister::{DeviceCanisterIndex, RunOutput};
use crate::domain::demand::BatchDemand;
use crate::domain::topology::SlotTopology;
use crate::domain::types::DeviceId;
use crate::engine::auto_reconciler::AutoReconciler;
use crate::engine::canister_batcher::CanisterBatcher;
use crate::engine::error::EngineResult;
use crate::engine::operator_balancer::OperatorBalancer;
use crate::engine::quadrant_allocator::QuadrantAllocator;
use crate::engine::session::RecommendationSession;
use std::collections::BTreeMap;
use tracing::{debug, info};

// ==========================================
// RecommendationOrchestrator - 运行编排器
// ==========================================

pub struct RecommendationOrchestrator {
    allocator: QuadrantAllocator,
    batcher: CanisterBatcher,
    reconciler: AutoReconciler,
    balancer: OperatorBalancer,
    capacity_limit: i64,
}

impl RecommendationOrchestrator {
    /// 创建新的编排器实例
    ///
    /// # 参数
    /// - topology: 槽位象限拓扑
    /// - capacity_limit: 单象限弹夹容量上限
    /// - max_per_position: 单仓位最大药量
    /// - operator_count: 加药操作员人数
    pub fn new(
        topology: SlotTopology,
        capacity_limit: i64,
        max_per_position: i64,
        operator_count: i64,
    ) -> Self {
        Self {
            allocator: QuadrantAllocator::new(topology),
            batcher: CanisterBatcher::new(max_per_position),
            reconciler: AutoReconciler::new(),
            balancer: OperatorBalancer::new(operator_count),
            capacity_limit,
        }
    }

    /// 执行一次完整推荐运行
    ///
    /// # 参数
    /// - demand: 需求树 (象限分配就地回填)
    /// - canister_indexes: 设备 -> 在架弹夹索引
    ///
    /// # 返回
    /// 跨设备累计的运行产出
    pub fn run(
        &self,
        demand: &mut BatchDemand,
        canister_indexes: &BTreeMap<DeviceId, DeviceCanisterIndex>,
    ) -> EngineResult<RunOutput> {
        info!(
            patient_count = demand.patients.len(),
            device_count = demand.device_patient_order.len(),
            "开始推荐运行编排"
        );

        let mut output = RunOutput::new();
        let device_order: Vec<(DeviceId, Vec<i64>)> = demand
            .device_patient_order
            .iter()
            .map(|(device_id, patients)| (*device_id, patients.clone()))
            .collect();

        for (device_id, patient_order) in device_order {
            let device_packs = demand
                .device_packs
                .get(&device_id)
                .cloned()
                .unwrap_or_default();
            let mut session = RecommendationSession::new(self.capacity_limit);
            let mut device_batches = Vec::new();

            // ==========================================
            // 步骤1: 逐病人做两遍象限分配与弹夹组批
            // ==========================================
            debug!(device_id, patients = patient_order.len(), "步骤1: 逐病人分配与组批");

            for patient_id in patient_order {
                session.begin_patient_pass();
                let touched = self.allocator.allocate_manual_slots(
                    demand,
                    &mut session,
                    patient_id,
                    &device_packs,
                )?;
                output.recomputed_packs.extend(touched);
                self.allocator.resolve_multi_quadrant_slots(
                    demand,
                    &mut session,
                    patient_id,
                    &device_packs,
                )?;
                device_batches.extend(self.batcher.build_patient_batches(
                    demand,
                    &mut session,
                    patient_id,
                    device_id,
                    &device_packs,
                ));
            }

            // ==========================================
            // 步骤2: 设备级自动落药对账
            // ==========================================
            debug!(device_id, "步骤2: 自动落药对账");

            let fallback_index;
            let index = match canister_indexes.get(&device_id) {
                Some(index) => index,
                None => {
                    fallback_index = DeviceCanisterIndex::default();
                    &fallback_index
                }
            };
            let (resolutions, covered_packs) =
                self.reconciler
                    .reconcile_device(demand, index, device_id, &device_packs);
            output.auto_resolutions.extend(resolutions);
            output.recomputed_packs.extend(covered_packs);

            // ==========================================
            // 步骤3: 弹夹序号平移后并入总产出
            // ==========================================
            let order_offset = output.canister_batches.len() as i64;
            for mut batch in device_batches {
                batch.order_no += order_offset;
                output.mfd_slot_ids.extend(batch.slot_ids());
                output.canister_batches.push(batch);
            }

            info!(
                device_id,
                batch_total = output.canister_batches.len(),
                "设备编排完成"
            );
        }

        // ==========================================
        // 步骤4: 操作员分工
        // ==========================================
        debug!("步骤4: 操作员分工");

        self.balancer.assign_operators(&mut output);

        info!(
            canister_batches = output.canister_batches.len(),
            auto_rows = output.auto_resolutions.len(),
            recomputed_packs = output.recomputed_packs.len(),
            mfd_slot_ids = output.mfd_slot_ids.len(),
            "推荐运行编排完成"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::demand::SlotAssignment;
    use crate::domain::types::{PackId, PatientId, SlotNumber};
    use std::collections::BTreeSet;

    /// 登记一个全手工槽位并配齐数量/句柄/对账清单
    fn seed_manual_slot(
        demand: &mut BatchDemand,
        patient_id: PatientId,
        pack_id: PackId,
        slot: SlotNumber,
        drug: &str,
        qty: f64,
    ) {
        demand
            .patients
            .entry(patient_id)
            .or_default()
            .packs
            .entry(pack_id)
            .or_default()
            .columns
            .entry(1)
            .or_default()
            .drops
            .entry(1)
            .or_default()
            .insert(slot, SlotAssignment::new());
        demand
            .manual_slots
            .entry(patient_id)
            .or_default()
            .entry(pack_id)
            .or_default()
            .entry(1)
            .or_default()
            .insert(slot);
        demand
            .pack_slot_quantities
            .entry(pack_id)
            .or_default()
            .entry(slot)
            .or_default()
            .push((drug.to_string(), qty));
        demand
            .slot_identity
            .entry(pack_id)
            .or_default()
            .entry(drug.to_string())
            .or_default()
            .insert(slot, pack_id * 1000 + slot);
        demand
            .pack_slot_drugs
            .entry(pack_id)
            .or_default()
            .entry(slot)
            .or_default()
            .insert(drug.to_string());
    }

    fn attach_device(
        demand: &mut BatchDemand,
        device_id: DeviceId,
        patients: &[(PatientId, &[PackId])],
    ) {
        let order: Vec<PatientId> = patients.iter().map(|(patient, _)| *patient).collect();
        demand.device_patient_order.insert(device_id, order);
        let packs: BTreeSet<PackId> = patients
            .iter()
            .flat_map(|(_, packs)| packs.iter().copied())
            .collect();
        demand.device_packs.insert(device_id, packs);
    }

    fn orchestrator() -> RecommendationOrchestrator {
        RecommendationOrchestrator::new(SlotTopology::default_28_slot(), 20, 4, 4)
    }

    #[test]
    fn test_full_run_produces_batches_and_operators() {
        let mut demand = BatchDemand::new();
        seed_manual_slot(&mut demand, 100, 1, 10, "A", 2.0);
        seed_manual_slot(&mut demand, 100, 1, 11, "B", 1.0);
        seed_manual_slot(&mut demand, 200, 2, 12, "C", 3.0);
        attach_device(&mut demand, 7, &[(100, &[1]), (200, &[2])]);

        let output = orchestrator().run(&mut demand, &BTreeMap::new()).unwrap();

        assert!(!output.canister_batches.is_empty());
        assert!(output
            .canister_batches
            .iter()
            .all(|b| b.assigned_operator.is_some()));
        assert_eq!(output.recomputed_packs, [1, 2].into_iter().collect());
        assert!(output.mfd_slot_ids.contains(&1010));
        assert!(output.mfd_slot_ids.contains(&2012));
    }

    #[test]
    fn test_order_no_continuous_across_devices() {
        let mut demand = BatchDemand::new();
        seed_manual_slot(&mut demand, 100, 1, 10, "A", 1.0);
        seed_manual_slot(&mut demand, 200, 2, 11, "B", 1.0);
        attach_device(&mut demand, 7, &[(100, &[1])]);
        attach_device(&mut demand, 8, &[(200, &[2])]);

        let output = orchestrator().run(&mut demand, &BTreeMap::new()).unwrap();

        let mut order_nos: Vec<i64> =
            output.canister_batches.iter().map(|b| b.order_no).collect();
        order_nos.sort_unstable();
        assert_eq!(order_nos, vec![1, 2]);
        // 设备号小的先编排
        let first = output
            .canister_batches
            .iter()
            .find(|b| b.order_no == 1)
            .map(|b| b.dest_device_id);
        assert_eq!(first, Some(7));
    }

    #[test]
    fn test_auto_rows_flow_into_output() {
        let mut demand = BatchDemand::new();
        seed_manual_slot(&mut demand, 100, 1, 10, "A", 1.0);
        // 自动槽位: 不入手工清单, 只进对账工作表
        demand
            .pack_slot_drugs
            .entry(1)
            .or_default()
            .entry(15)
            .or_default()
            .insert("AUTO".to_string());
        demand
            .slot_identity
            .entry(1)
            .or_default()
            .entry("AUTO".to_string())
            .or_default()
            .insert(15, 1015);
        attach_device(&mut demand, 7, &[(100, &[1])]);

        let output = orchestrator().run(&mut demand, &BTreeMap::new()).unwrap();

        // 设备无在架索引, 两行都是待人工
        assert_eq!(output.auto_resolutions.len(), 2);
        assert!(output.auto_resolutions.iter().all(|r| !r.is_resolved()));
    }

    #[test]
    fn test_empty_demand_yields_empty_output() {
        let mut demand = BatchDemand::new();
        let output = orchestrator().run(&mut demand, &BTreeMap::new()).unwrap();
        assert!(output.canister_batches.is_empty());
        assert!(output.auto_resolutions.is_empty());
        assert!(output.recomputed_packs.is_empty());
    }
}
