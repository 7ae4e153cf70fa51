//! 看门狗：停滞检测、复杂度上限、重复步骤检测
//!
//! 停滞：execution_history 连续 N 轮不增长则强制完成；
//! 复杂度：迭代数硬上限，超限中止而非继续；
//! 重复：新计划与上一条记录的 atom + 已解析输入集完全一致时中止。

use std::collections::BTreeSet;

use crate::state::{StepPlan, StepRecord};

/// 停滞看门狗：历史长度不增长时累计计数，达阈值判停滞
#[derive(Debug)]
pub struct StallWatchdog {
    last_history_len: usize,
    stalled_attempts: u32,
    threshold: u32,
}

impl StallWatchdog {
    pub fn new(threshold: u32) -> Self {
        Self {
            last_history_len: 0,
            stalled_attempts: 0,
            threshold: threshold.max(1),
        }
    }

    /// 每轮迭代调用一次；返回 true 表示已判定停滞
    pub fn observe(&mut self, history_len: usize) -> bool {
        if history_len > self.last_history_len {
            self.last_history_len = history_len;
            self.stalled_attempts = 0;
        } else {
            self.stalled_attempts += 1;
        }
        self.stalled_attempts >= self.threshold
    }

    pub fn stalled_attempts(&self) -> u32 {
        self.stalled_attempts
    }
}

/// 复杂度限制器：迭代数硬上限
#[derive(Debug)]
pub struct ComplexityLimiter {
    max_iterations: u32,
    iterations: u32,
}

impl ComplexityLimiter {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            iterations: 0,
        }
    }

    /// 记一次迭代；返回 true 表示已超限
    pub fn tick(&mut self) -> bool {
        self.iterations += 1;
        self.iterations > self.max_iterations
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

/// 重复检测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCheck {
    /// atom 与输入集都与上一条记录一致：几乎必然无效，应中止
    Repeat,
    /// 同 atom 不同输入：允许，仅软告警
    SameAtomDifferentInputs,
    /// 无重复
    Distinct,
}

/// 比较新计划与紧邻前一条记录；输入集比较忽略顺序
pub fn detect_repeat(prev: Option<&StepRecord>, plan: &StepPlan) -> LoopCheck {
    let Some(prev) = prev else {
        return LoopCheck::Distinct;
    };
    if prev.atom_id != plan.atom_id {
        return LoopCheck::Distinct;
    }
    let prev_inputs: BTreeSet<&str> = prev.input_refs_used.iter().map(String::as_str).collect();
    let next_inputs: BTreeSet<&str> = plan.input_refs.iter().map(String::as_str).collect();
    if prev_inputs == next_inputs {
        LoopCheck::Repeat
    } else {
        LoopCheck::SameAtomDifferentInputs
    }
}
