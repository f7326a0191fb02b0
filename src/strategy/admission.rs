//! Admission control
//!
//! Pure decisions over a position, a price and the clock. Nothing here
//! touches the ledger or the exchange; the entry gate acts on the answers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{
    AppConfig, CapacityConfig, EarlyCloseConfig, EmergencyConfig, HalfCloseConfig,
    ReadinessConfig, RecycleConfig, StepLadder,
};
use crate::domain::{AveragingPosition, ReadinessVerdict, SignalStrength};

// ==================== Step add ====================

/// Which gate approved a step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StepGate {
    /// Early steps: unrealized loss against committed margin
    MarginLoss { loss_pct: Decimal, required_pct: Decimal },
    /// Later steps: distance from average and the wait both satisfied
    Distance {
        distance_pct: Decimal,
        required_pct: Decimal,
    },
    /// Later steps: distance so far past the gate that the wait is skipped
    DistanceWaiver {
        distance_pct: Decimal,
        required_pct: Decimal,
    },
}

impl std::fmt::Display for StepGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepGate::MarginLoss {
                loss_pct,
                required_pct,
            } => write!(f, "margin loss {:.1}% >= {}%", loss_pct, required_pct),
            StepGate::Distance {
                distance_pct,
                required_pct,
            } => write!(f, "distance {:.2}% >= {}%", distance_pct, required_pct),
            StepGate::DistanceWaiver {
                distance_pct,
                required_pct,
            } => write!(
                f,
                "distance {:.2}% far past {}%, wait waived",
                distance_pct, required_pct
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HoldReason {
    LadderExhausted { step: u32, limit: u32 },
    LossBelowThreshold { loss_pct: Decimal, required_pct: Decimal },
    DistanceBelowThreshold {
        distance_pct: Decimal,
        required_pct: Decimal,
    },
    WaitPending {
        waited_minutes: Decimal,
        required_minutes: u32,
    },
}

impl std::fmt::Display for HoldReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldReason::LadderExhausted { step, limit } => {
                write!(f, "at step {} of {}", step, limit)
            }
            HoldReason::LossBelowThreshold {
                loss_pct,
                required_pct,
            } => write!(f, "margin loss {:.1}% < {}%", loss_pct, required_pct),
            HoldReason::DistanceBelowThreshold {
                distance_pct,
                required_pct,
            } => write!(f, "distance {:.2}% < {}%", distance_pct, required_pct),
            HoldReason::WaitPending {
                waited_minutes,
                required_minutes,
            } => write!(
                f,
                "waited {:.1}min of {}min",
                waited_minutes, required_minutes
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StepDecision {
    Add {
        next_step: u32,
        margin: Decimal,
        gate: StepGate,
    },
    Hold(HoldReason),
}

// ==================== Closing decisions ====================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HalfClosePlan {
    pub profit_usd: Decimal,
    pub target_usd: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EarlyCloseKind {
    SmallProfit,
    SmallLoss,
}

impl std::fmt::Display for EarlyCloseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EarlyCloseKind::SmallProfit => write!(f, "small profit"),
            EarlyCloseKind::SmallLoss => write!(f, "small loss"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyClosePlan {
    pub pnl_usd: Decimal,
    pub kind: EarlyCloseKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecyclePlan {
    pub fraction: Decimal,
    pub distance_pct: Decimal,
    pub pnl_usd: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmergencyTrigger {
    HardStop,
    Drawdown,
    Both,
}

impl std::fmt::Display for EmergencyTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmergencyTrigger::HardStop => write!(f, "hard stop"),
            EmergencyTrigger::Drawdown => write!(f, "drawdown"),
            EmergencyTrigger::Both => write!(f, "hard stop + drawdown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmergencySignal {
    pub trigger: EmergencyTrigger,
    pub loss_usd: Decimal,
    pub drawdown_pct: Decimal,
}

// ==================== Controller ====================

#[derive(Debug, Clone)]
pub struct AdmissionController {
    ladder: StepLadder,
    capacity: CapacityConfig,
    emergency: EmergencyConfig,
    half_close: HalfCloseConfig,
    early_close: EarlyCloseConfig,
    recycle: RecycleConfig,
    readiness: ReadinessConfig,
}

impl AdmissionController {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            ladder: config.ladder.clone(),
            capacity: config.capacity.clone(),
            emergency: config.emergency.clone(),
            half_close: config.half_close.clone(),
            early_close: config.early_close.clone(),
            recycle: config.recycle.clone(),
            readiness: config.readiness.clone(),
        }
    }

    /// Highest step this position may reach. Recycling frees margin, so a
    /// position that has recycled may use the full ladder.
    pub fn step_limit(&self, position: &AveragingPosition) -> u32 {
        if position.recycle_count() > 0 {
            self.ladder.len()
        } else {
            self.ladder.nominal_steps()
        }
    }

    pub fn evaluate_step_add(
        &self,
        position: &AveragingPosition,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> StepDecision {
        let step = position.step();
        let limit = self.step_limit(position);
        let next_step = step + 1;
        let rung = match self.ladder.rung(next_step) {
            Some(rung) if step < limit => rung,
            _ => return StepDecision::Hold(HoldReason::LadderExhausted { step, limit }),
        };

        if let Some(required_pct) = self.ladder.early_loss_threshold(step) {
            let loss_pct = position.margin_loss_pct(price);
            if loss_pct < required_pct {
                return StepDecision::Hold(HoldReason::LossBelowThreshold {
                    loss_pct,
                    required_pct,
                });
            }
            return StepDecision::Add {
                next_step,
                margin: rung.margin,
                gate: StepGate::MarginLoss {
                    loss_pct,
                    required_pct,
                },
            };
        }

        let distance_pct = position.adverse_move_pct(price);
        let required_pct = rung.distance_pct;
        if distance_pct < required_pct {
            return StepDecision::Hold(HoldReason::DistanceBelowThreshold {
                distance_pct,
                required_pct,
            });
        }

        let waited_minutes = position.minutes_since_last_step(now);
        let gate = if waited_minutes >= Decimal::from(rung.wait_minutes) {
            StepGate::Distance {
                distance_pct,
                required_pct,
            }
        } else if distance_pct >= required_pct * self.ladder.time_waiver_multiple {
            StepGate::DistanceWaiver {
                distance_pct,
                required_pct,
            }
        } else {
            return StepDecision::Hold(HoldReason::WaitPending {
                waited_minutes,
                required_minutes: rung.wait_minutes,
            });
        };

        StepDecision::Add {
            next_step,
            margin: rung.margin,
            gate,
        }
    }

    /// Whether adding `next_step` needs the readiness oracle at all
    pub fn needs_confirmation(&self, next_step: u32) -> bool {
        next_step > self.readiness.lenient_until_step
    }

    /// Strictness grows with the step: later steps need a stronger signal
    pub fn confirms_step(&self, next_step: u32, verdict: &ReadinessVerdict) -> bool {
        if !self.needs_confirmation(next_step) {
            return true;
        }
        if !verdict.ready {
            return false;
        }

        let required = if next_step >= self.readiness.strong_from_step {
            Some(SignalStrength::Strong)
        } else if next_step >= self.readiness.medium_from_step {
            Some(SignalStrength::Medium)
        } else {
            None
        };
        match required {
            None => true,
            Some(min) => verdict.strength.is_some_and(|s| s >= min),
        }
    }

    pub fn evaluate_half_close(
        &self,
        position: &AveragingPosition,
        price: Decimal,
    ) -> Option<HalfClosePlan> {
        if position.half_closed() || position.step() < self.half_close.min_step {
            return None;
        }
        let target_usd = self.half_close.targets.for_step(position.step())?;
        let profit_usd = position.unrealized_pnl(price);
        (profit_usd >= target_usd).then_some(HalfClosePlan {
            profit_usd,
            target_usd,
        })
    }

    /// Frees capacity by dropping a young position near break-even once
    /// aggregate margin is high and more positions are open than the
    /// above-threshold limit allows
    pub fn evaluate_early_close(
        &self,
        position: &AveragingPosition,
        price: Decimal,
        total_margin: Decimal,
        open_positions: usize,
    ) -> Option<EarlyClosePlan> {
        if total_margin < self.capacity.margin_threshold
            || open_positions <= self.capacity.max_positions_above
            || position.step() > self.early_close.max_step
        {
            return None;
        }

        let pnl_usd = position.unrealized_pnl(price);
        let kind = if pnl_usd >= self.early_close.min_profit_usd {
            EarlyCloseKind::SmallProfit
        } else if pnl_usd >= -self.early_close.max_loss_usd {
            EarlyCloseKind::SmallLoss
        } else {
            return None;
        };
        Some(EarlyClosePlan { pnl_usd, kind })
    }

    pub fn evaluate_recycle(
        &self,
        position: &AveragingPosition,
        price: Decimal,
    ) -> Option<RecyclePlan> {
        let cfg = &self.recycle;
        if !cfg.enabled
            || position.step() < cfg.after_step
            || position.recycle_count() >= cfg.max_recycles
        {
            return None;
        }

        let distance_pct = position.adverse_move_pct(price);
        if distance_pct > cfg.max_distance_pct || distance_pct <= cfg.min_distance_pct {
            return None;
        }
        let pnl_usd = position.unrealized_pnl(price);
        (pnl_usd >= cfg.min_profit_usd).then_some(RecyclePlan {
            fraction: cfg.fraction,
            distance_pct,
            pnl_usd,
        })
    }

    pub fn evaluate_emergency(
        &self,
        position: &AveragingPosition,
        price: Decimal,
    ) -> Option<EmergencySignal> {
        let loss_usd = -position.unrealized_pnl(price);
        let drawdown_pct = position.adverse_move_pct(price);

        let hard = loss_usd >= self.emergency.hard_stop_usd;
        let drawdown = drawdown_pct >= self.emergency.stop_percent;
        let trigger = match (hard, drawdown) {
            (true, true) => EmergencyTrigger::Both,
            (true, false) => EmergencyTrigger::HardStop,
            (false, true) => EmergencyTrigger::Drawdown,
            (false, false) => return None,
        };
        Some(EmergencySignal {
            trigger,
            loss_usd,
            drawdown_pct,
        })
    }
}
