// ==========================================
// MFD 加药推荐系统 - 象限分配器
// ==========================================
// 职责: 给手工槽位定象限 (两遍: 全手工槽位 / 多象限槽位收敛)
// 红线: 约束槽位的落位象限必须在其硬件可达集内
// ==========================================
// 输入: 需求树 + 槽位拓扑 + 运行会话
// 输出: 就地回填的 (象限, 配置号), 触及的药盒集
// ==========================================

use crate::domain::demand::BatchDemand;
use crate::domain::topology::SlotTopology;
use crate::domain::types::{ColumnId, PackId, PatientId, Quadrant, QuadrantId, SlotNumber};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::session::RecommendationSession;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

// ==========================================
// QuadrantAllocator - 象限分配器
// ==========================================
pub struct QuadrantAllocator {
    topology: SlotTopology,
}

impl QuadrantAllocator {
    pub fn new(topology: SlotTopology) -> Self {
        Self { topology }
    }

    /// 第一遍: 全手工槽位分配 (单病人单设备)
    ///
    /// 规则:
    /// 1) 每列槽位按槽位号降序处理
    /// 2) 最多 4 个槽位成组共用一个象限 (一组对应一个未来弹夹)
    /// 3) 组首槽位定象限: 约束槽位在可达集内取计数最低者, 无约束槽位取全局最低
    /// 4) 组内后续槽位若可达集不含组象限, 提前结组另起新组
    /// 5) 组满 4 个或槽位耗尽时结组: record_fill 计数并触发超限回冲
    ///
    /// # 返回
    /// 本遍触及的药盒集 (写入器需重建其分析行)
    #[instrument(skip(self, demand, session), fields(patient_id = patient_id))]
    pub fn allocate_manual_slots(
        &self,
        demand: &mut BatchDemand,
        session: &mut RecommendationSession,
        patient_id: PatientId,
        device_packs: &BTreeSet<PackId>,
    ) -> EngineResult<BTreeSet<PackId>> {
        let mut recomputed: BTreeSet<PackId> = BTreeSet::new();
        let work = match demand.manual_slots.get(&patient_id) {
            Some(packs) => packs.clone(),
            None => return Ok(recomputed),
        };

        for (pack_id, columns) in work {
            if !device_packs.contains(&pack_id) {
                continue;
            }
            recomputed.insert(pack_id);

            for (column, slots) in columns {
                if slots.is_empty() {
                    continue;
                }
                let slots_desc: Vec<SlotNumber> = slots.iter().rev().copied().collect();

                let mut group_quad: Option<QuadrantId> = None;
                let mut group_len = 0usize;
                for slot in slots_desc {
                    let chosen = match group_quad {
                        Some(quad) if self.topology.valid_quadrants(slot).contains(&quad) => quad,
                        _ => {
                            // 组首槽位, 或后续槽位与组象限拓扑冲突: 先结清当前组
                            if group_len > 0 {
                                if let Some(quad) = group_quad {
                                    session.record_fill(&Quadrant::single(quad));
                                }
                            }
                            let allowed = self.topology.valid_quadrants(slot);
                            let quad = session.least_filled_in(&allowed).ok_or(
                                EngineError::AllocationGap {
                                    pack_id,
                                    slot_number: slot,
                                },
                            )?;
                            debug!(pack_id, column, slot, quadrant = quad, "组首槽位定象限");
                            group_quad = Some(quad);
                            group_len = 0;
                            quad
                        }
                    };

                    self.assign_slot(demand, patient_id, pack_id, column, slot, chosen);
                    group_len += 1;
                    if group_len == 4 {
                        session.record_fill(&Quadrant::single(chosen));
                        group_quad = None;
                        group_len = 0;
                    }
                }
                // 槽位耗尽, 未满的组同样结清
                if group_len > 0 {
                    if let Some(quad) = group_quad {
                        session.record_fill(&Quadrant::single(quad));
                    }
                }
            }
        }

        Ok(recomputed)
    }

    /// 第二遍: 多象限槽位收敛 (仅处理含全手工槽位的药盒)
    ///
    /// 规则:
    /// 1) 候选槽位跨列收集, 按槽位号降序
    /// 2) 每个槽位沿 (计数, 编号) 升序遍历象限, 首个落在候选集内者胜出
    /// 3) 胜出后替换占位键: 删掉包含胜者的旧候选, 插入单象限键
    /// 4) 每 4 个槽位或耗尽时按最后胜者 record_fill
    #[instrument(skip(self, demand, session), fields(patient_id = patient_id))]
    pub fn resolve_multi_quadrant_slots(
        &self,
        demand: &mut BatchDemand,
        session: &mut RecommendationSession,
        patient_id: PatientId,
        device_packs: &BTreeSet<PackId>,
    ) -> EngineResult<()> {
        let packs: Vec<PackId> = demand
            .manual_slots
            .get(&patient_id)
            .map(|packs| packs.keys().copied().collect())
            .unwrap_or_default();

        for pack_id in packs {
            if !device_packs.contains(&pack_id) {
                continue;
            }

            // 跨列收集多象限候选槽位
            let mut candidates: Vec<(SlotNumber, ColumnId, BTreeSet<QuadrantId>)> = Vec::new();
            if let Some(pack) = demand
                .patients
                .get(&patient_id)
                .and_then(|patient| patient.packs.get(&pack_id))
            {
                for (column, column_demand) in &pack.columns {
                    for slots in column_demand.drops.values() {
                        for (slot, assignment) in slots {
                            if assignment.is_multi_quadrant() {
                                candidates.push((*slot, *column, assignment.candidate_quadrants()));
                            }
                        }
                    }
                }
            }
            if candidates.is_empty() {
                continue;
            }
            candidates.sort_by(|a, b| b.0.cmp(&a.0));

            let total = candidates.len();
            let mut group_len = 0usize;
            let mut last_winner: Option<QuadrantId> = None;
            for (index, (slot, column, candidate_set)) in candidates.into_iter().enumerate() {
                let winner = session
                    .quadrants_by_fill()
                    .into_iter()
                    .find(|quad| candidate_set.contains(quad))
                    .ok_or(EngineError::AllocationGap {
                        pack_id,
                        slot_number: slot,
                    })?;
                debug!(pack_id, column, slot, quadrant = winner, "多象限槽位收敛");

                self.converge_slot(demand, patient_id, pack_id, column, slot, winner);
                last_winner = Some(winner);
                group_len += 1;
                if group_len == 4 || index == total - 1 {
                    if let Some(quad) = last_winner {
                        session.record_fill(&Quadrant::single(quad));
                    }
                    group_len = 0;
                }
            }
        }

        Ok(())
    }

    /// 第一遍写回: 覆盖槽位的象限与候选表
    fn assign_slot(
        &self,
        demand: &mut BatchDemand,
        patient_id: PatientId,
        pack_id: PackId,
        column: ColumnId,
        slot: SlotNumber,
        quad: QuadrantId,
    ) {
        if let Some(column_demand) = demand
            .patients
            .get_mut(&patient_id)
            .and_then(|patient| patient.packs.get_mut(&pack_id))
            .and_then(|pack| pack.columns.get_mut(&column))
        {
            for slots in column_demand.drops.values_mut() {
                if let Some(assignment) = slots.get_mut(&slot) {
                    assignment.quadrant = Some(Quadrant::single(quad));
                    assignment.quad_configs.clear();
                    if let Some(config_id) = self.topology.config_id(slot, quad) {
                        assignment.quad_configs.insert(Quadrant::single(quad), config_id);
                    }
                }
            }
        }
    }

    /// 第二遍写回: 用单象限键替换包含胜者的占位键
    fn converge_slot(
        &self,
        demand: &mut BatchDemand,
        patient_id: PatientId,
        pack_id: PackId,
        column: ColumnId,
        slot: SlotNumber,
        winner: QuadrantId,
    ) {
        if let Some(column_demand) = demand
            .patients
            .get_mut(&patient_id)
            .and_then(|patient| patient.packs.get_mut(&pack_id))
            .and_then(|pack| pack.columns.get_mut(&column))
        {
            for slots in column_demand.drops.values_mut() {
                if let Some(assignment) = slots.get_mut(&slot) {
                    let obsolete: Vec<Quadrant> = assignment
                        .quad_configs
                        .keys()
                        .filter(|key| key.contains(winner))
                        .cloned()
                        .collect();
                    let mut fallback_config = None;
                    for key in obsolete {
                        let removed = assignment.quad_configs.remove(&key);
                        if fallback_config.is_none() {
                            fallback_config = removed;
                        }
                    }
                    // 拓扑无配置号时沿用占位键的配置号
                    let config_id = self.topology.config_id(slot, winner).or(fallback_config);
                    if let Some(config_id) = config_id {
                        assignment
                            .quad_configs
                            .insert(Quadrant::single(winner), config_id);
                    }
                    assignment.quadrant = Some(Quadrant::single(winner));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::demand::SlotAssignment;

    /// 在需求树里登记一个全手工槽位
    fn add_manual_slot(
        demand: &mut BatchDemand,
        patient_id: PatientId,
        pack_id: PackId,
        column: ColumnId,
        drop: i64,
        slot: SlotNumber,
    ) {
        demand
            .patients
            .entry(patient_id)
            .or_default()
            .packs
            .entry(pack_id)
            .or_default()
            .columns
            .entry(column)
            .or_default()
            .drops
            .entry(drop)
            .or_default()
            .insert(slot, SlotAssignment::new());
        demand
            .manual_slots
            .entry(patient_id)
            .or_default()
            .entry(pack_id)
            .or_default()
            .entry(column)
            .or_default()
            .insert(slot);
    }

    fn add_multi_quad_slot(
        demand: &mut BatchDemand,
        patient_id: PatientId,
        pack_id: PackId,
        column: ColumnId,
        drop: i64,
        slot: SlotNumber,
        configs: &[(Quadrant, i64)],
    ) {
        let mut assignment = SlotAssignment::new();
        for (quad, config_id) in configs {
            assignment.quad_configs.insert(quad.clone(), *config_id);
        }
        assignment.quadrant = configs.first().map(|(quad, _)| quad.clone());
        demand
            .patients
            .entry(patient_id)
            .or_default()
            .packs
            .entry(pack_id)
            .or_default()
            .columns
            .entry(column)
            .or_default()
            .drops
            .entry(drop)
            .or_default()
            .insert(slot, assignment);
    }

    fn assignment_of(
        demand: &BatchDemand,
        patient_id: PatientId,
        pack_id: PackId,
        column: ColumnId,
        slot: SlotNumber,
    ) -> SlotAssignment {
        demand.patients[&patient_id].packs[&pack_id].columns[&column]
            .drops
            .values()
            .find_map(|slots| slots.get(&slot))
            .cloned()
            .unwrap()
    }

    fn device_packs(pack_ids: &[PackId]) -> BTreeSet<PackId> {
        pack_ids.iter().copied().collect()
    }

    #[test]
    fn test_pass1_groups_of_four_share_quadrant() {
        let mut demand = BatchDemand::new();
        // 6 个无约束槽位 (8..=13 四象限全可达)
        for slot in 8..=13 {
            add_manual_slot(&mut demand, 7, 100, 2, 1, slot);
        }
        let mut session = RecommendationSession::new(20);
        session.begin_patient_pass();
        let allocator = QuadrantAllocator::new(SlotTopology::default_28_slot());

        let recomputed = allocator
            .allocate_manual_slots(&mut demand, &mut session, 7, &device_packs(&[100]))
            .unwrap();
        assert_eq!(recomputed, device_packs(&[100]));

        // 降序: 13,12,11,10 成组取象限1; 9,8 成组取象限2
        for slot in 10..=13 {
            let assignment = assignment_of(&demand, 7, 100, 2, slot);
            assert_eq!(assignment.quadrant, Some(Quadrant::single(1)));
        }
        for slot in 8..=9 {
            let assignment = assignment_of(&demand, 7, 100, 2, slot);
            assert_eq!(assignment.quadrant, Some(Quadrant::single(2)));
        }
        assert_eq!(session.fill_of(1), 1);
        assert_eq!(session.fill_of(2), 1);
    }

    #[test]
    fn test_pass1_constrained_tie_prefers_lower_id() {
        let mut demand = BatchDemand::new();
        // 槽位22 可达集 {1,4}
        add_manual_slot(&mut demand, 7, 100, 1, 1, 22);
        let mut session = RecommendationSession::new(20);
        session.begin_patient_pass();
        // 预置计数 {1:5, 2:3, 3:7, 4:5}
        for _ in 0..5 {
            session.record_fill(&Quadrant::single(1));
        }
        for _ in 0..3 {
            session.record_fill(&Quadrant::single(2));
        }
        for _ in 0..7 {
            session.record_fill(&Quadrant::single(3));
        }
        for _ in 0..5 {
            session.record_fill(&Quadrant::single(4));
        }
        let allocator = QuadrantAllocator::new(SlotTopology::default_28_slot());

        allocator
            .allocate_manual_slots(&mut demand, &mut session, 7, &device_packs(&[100]))
            .unwrap();

        // 1 与 4 同为 5, 取编号较小的 1; 2/3 不可达不得选中
        let assignment = assignment_of(&demand, 7, 100, 1, 22);
        assert_eq!(assignment.quadrant, Some(Quadrant::single(1)));
        assert_eq!(assignment.quad_configs[&Quadrant::single(1)], 1);
    }

    #[test]
    fn test_pass1_topology_conflict_closes_group_early() {
        let mut demand = BatchDemand::new();
        // 降序处理: 28 先定象限4, 6 的可达集 {2,3} 不含 4, 必须另起新组
        add_manual_slot(&mut demand, 7, 100, 1, 1, 28);
        add_manual_slot(&mut demand, 7, 100, 1, 1, 6);
        let mut session = RecommendationSession::new(20);
        session.begin_patient_pass();
        let allocator = QuadrantAllocator::new(SlotTopology::default_28_slot());

        allocator
            .allocate_manual_slots(&mut demand, &mut session, 7, &device_packs(&[100]))
            .unwrap();

        assert_eq!(
            assignment_of(&demand, 7, 100, 1, 28).quadrant,
            Some(Quadrant::single(4))
        );
        assert_eq!(
            assignment_of(&demand, 7, 100, 1, 6).quadrant,
            Some(Quadrant::single(2))
        );
        // 两个组各结清一次
        assert_eq!(session.fill_of(4), 1);
        assert_eq!(session.fill_of(2), 1);
    }

    #[test]
    fn test_pass1_gap_on_empty_valid_set() {
        let mut valid = std::collections::BTreeMap::new();
        valid.insert(5i64, BTreeSet::new());
        let topology = SlotTopology::new(valid, Default::default());

        let mut demand = BatchDemand::new();
        add_manual_slot(&mut demand, 7, 100, 1, 1, 5);
        let mut session = RecommendationSession::new(20);
        session.begin_patient_pass();
        let allocator = QuadrantAllocator::new(topology);

        let err = allocator
            .allocate_manual_slots(&mut demand, &mut session, 7, &device_packs(&[100]))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::AllocationGap {
                pack_id: 100,
                slot_number: 5
            }
        );
    }

    #[test]
    fn test_pass1_skips_packs_of_other_devices() {
        let mut demand = BatchDemand::new();
        add_manual_slot(&mut demand, 7, 100, 1, 1, 10);
        let mut session = RecommendationSession::new(20);
        session.begin_patient_pass();
        let allocator = QuadrantAllocator::new(SlotTopology::default_28_slot());

        let recomputed = allocator
            .allocate_manual_slots(&mut demand, &mut session, 7, &device_packs(&[999]))
            .unwrap();
        assert!(recomputed.is_empty());
        assert!(assignment_of(&demand, 7, 100, 1, 10).quadrant.is_none());
    }

    #[test]
    fn test_pass2_winner_follows_fill_order() {
        let mut demand = BatchDemand::new();
        // 药盒需含全手工槽位, 第二遍才处理
        add_manual_slot(&mut demand, 7, 100, 1, 1, 10);
        add_multi_quad_slot(
            &mut demand,
            7,
            100,
            2,
            1,
            15,
            &[(Quadrant::single(2), 2), (Quadrant::single(3), 3)],
        );
        let mut session = RecommendationSession::new(20);
        session.begin_patient_pass();
        // 象限2已有1个, 象限3为0 -> 3 胜出
        session.record_fill(&Quadrant::single(2));
        let allocator = QuadrantAllocator::new(SlotTopology::default_28_slot());

        allocator
            .resolve_multi_quadrant_slots(&mut demand, &mut session, 7, &device_packs(&[100]))
            .unwrap();

        let assignment = assignment_of(&demand, 7, 100, 2, 15);
        assert_eq!(assignment.quadrant, Some(Quadrant::single(3)));
        assert!(assignment.quad_configs.contains_key(&Quadrant::single(3)));
        assert_eq!(session.fill_of(3), 1);
    }

    #[test]
    fn test_pass2_replaces_combined_placeholder() {
        let mut demand = BatchDemand::new();
        add_manual_slot(&mut demand, 7, 100, 1, 1, 10);
        // 组合占位 (1+4), 配置号 2
        add_multi_quad_slot(
            &mut demand,
            7,
            100,
            2,
            1,
            22,
            &[(Quadrant::combined([1, 4]), 2)],
        );
        let mut session = RecommendationSession::new(20);
        session.begin_patient_pass();
        let allocator = QuadrantAllocator::new(SlotTopology::default_28_slot());

        allocator
            .resolve_multi_quadrant_slots(&mut demand, &mut session, 7, &device_packs(&[100]))
            .unwrap();

        let assignment = assignment_of(&demand, 7, 100, 2, 22);
        // 计数全 0, (计数, 编号) 升序首个命中候选集 {1,4} 的是 1
        assert_eq!(assignment.quadrant, Some(Quadrant::single(1)));
        assert!(!assignment
            .quad_configs
            .contains_key(&Quadrant::combined([1, 4])));
        assert_eq!(assignment.quad_configs[&Quadrant::single(1)], 1);
    }

    #[test]
    fn test_pass2_group_close_every_four() {
        let mut demand = BatchDemand::new();
        add_manual_slot(&mut demand, 7, 100, 1, 1, 10);
        // 5 个多象限槽位, 候选集 {2,3}
        for slot in [15, 16, 17, 18, 19] {
            add_multi_quad_slot(
                &mut demand,
                7,
                100,
                2,
                1,
                slot,
                &[(Quadrant::single(2), 2), (Quadrant::single(3), 3)],
            );
        }
        let mut session = RecommendationSession::new(20);
        session.begin_patient_pass();
        let allocator = QuadrantAllocator::new(SlotTopology::default_28_slot());

        allocator
            .resolve_multi_quadrant_slots(&mut demand, &mut session, 7, &device_packs(&[100]))
            .unwrap();

        // 4 个一组结清一次 + 末尾散组结清一次
        assert_eq!(session.fill_of(2) + session.fill_of(3), 2);
    }

    #[test]
    fn test_pass2_ignores_packs_without_manual_slot() {
        let mut demand = BatchDemand::new();
        // 只有多象限槽位, 无全手工槽位: 保持组合目的地
        add_multi_quad_slot(
            &mut demand,
            7,
            100,
            2,
            1,
            22,
            &[(Quadrant::combined([1, 4]), 2)],
        );
        let mut session = RecommendationSession::new(20);
        session.begin_patient_pass();
        let allocator = QuadrantAllocator::new(SlotTopology::default_28_slot());

        allocator
            .resolve_multi_quadrant_slots(&mut demand, &mut session, 7, &device_packs(&[100]))
            .unwrap();

        let assignment = assignment_of(&demand, 7, 100, 2, 22);
        assert_eq!(assignment.quadrant, Some(Quadrant::combined([1, 4])));
    }
}
