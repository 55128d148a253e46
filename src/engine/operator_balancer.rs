// ==========================================
// 加药分工均衡引擎 (Operator Balancer)
// ==========================================
// 职责: 把弹夹批按病人整体分派给加药操作员, 批数多者优先落位,
//       始终派给当前负载最轻的操作员
// 红线: 同一病人的弹夹批不得拆给多个操作员
// ==========================================

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::domain::canister::RunOutput;
use crate::domain::types::PatientId;

/// 加药分工均衡引擎
pub struct OperatorBalancer {
    /// 操作员人数, 编号 1..=N
    operator_count: i64,
}

impl OperatorBalancer {
    pub fn new(operator_count: i64) -> Self {
        Self {
            operator_count: operator_count.max(1),
        }
    }

    /// 为产出中的全部弹夹批回填操作员编号
    ///
    /// # 流程
    /// 1. 统计每个病人的批数, 按批数降序排队 (同批数按病人号升序)
    /// 2. 依次把整个病人派给当前批数最少的操作员 (并列取编号小者)
    /// 3. 每派一人即更新负载重新比较
    #[instrument(skip(self, output), fields(operator_count = self.operator_count))]
    pub fn assign_operators(&self, output: &mut RunOutput) {
        let counts = output.per_patient_batch_counts();
        if counts.is_empty() {
            return;
        }
        let total: i64 = counts.values().sum();
        let ideal = (total as f64 / self.operator_count as f64).ceil() as i64;

        let mut queue: Vec<(PatientId, i64)> = counts.into_iter().collect();
        queue.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut loads: BTreeMap<i64, i64> =
            (1..=self.operator_count).map(|op| (op, 0)).collect();
        let mut patient_operator: BTreeMap<PatientId, i64> = BTreeMap::new();
        for (patient_id, batch_count) in queue {
            let operator = loads
                .iter()
                .min_by_key(|(op, load)| (**load, **op))
                .map(|(op, _)| *op)
                .unwrap_or(1);
            *loads.entry(operator).or_insert(0) += batch_count;
            patient_operator.insert(patient_id, operator);
        }
        debug!(total_batches = total, ideal_per_operator = ideal, ?loads, "分工完成");

        for batch in &mut output.canister_batches {
            if let Some(operator) = patient_operator.get(&batch.patient_id) {
                batch.assigned_operator = Some(*operator);
            }
        }
    }
}

impl Default for OperatorBalancer {
    fn default() -> Self {
        Self::new(4)
    }
}
