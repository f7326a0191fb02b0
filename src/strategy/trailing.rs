//! Trailing take-profit
//!
//! `Inactive -> Trailing -> harvest`. Reaching the step target arms the
//! trail; giving back `callback` of the peak harvests, even below the
//! original target; sliding under the reset floor disarms without closing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{StepTargets, TakeProfitConfig};
use crate::domain::TrailState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TrailDecision {
    Hold,
    Activated { target_usd: Decimal },
    Raised { peak_usd: Decimal },
    Harvest {
        peak_usd: Decimal,
        profit_usd: Decimal,
        retrace: Decimal,
    },
    Reset { peak_usd: Decimal },
}

/// Decision plus the state to store back on the position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailOutcome {
    pub decision: TrailDecision,
    pub next: TrailState,
}

#[derive(Debug, Clone)]
pub struct TakeProfitTrailer {
    targets: StepTargets,
    callback: Decimal,
    reset_floor: Decimal,
}

impl TakeProfitTrailer {
    pub fn new(config: &TakeProfitConfig) -> Self {
        Self {
            targets: config.targets.clone(),
            callback: config.callback,
            reset_floor: config.reset_floor_usd,
        }
    }

    pub fn target_for_step(&self, step: u32) -> Option<Decimal> {
        self.targets.for_step(step)
    }

    pub fn evaluate(&self, state: TrailState, step: u32, profit: Decimal) -> TrailOutcome {
        match state {
            TrailState::Inactive => match self.target_for_step(step) {
                Some(target_usd) if profit >= target_usd => TrailOutcome {
                    decision: TrailDecision::Activated { target_usd },
                    next: TrailState::Trailing { peak_usd: profit },
                },
                _ => TrailOutcome {
                    decision: TrailDecision::Hold,
                    next: state,
                },
            },
            TrailState::Trailing { peak_usd } => {
                let raised = profit > peak_usd;
                let peak_usd = peak_usd.max(profit);
                let next = TrailState::Trailing { peak_usd };

                if peak_usd > Decimal::ZERO {
                    let retrace = (peak_usd - profit) / peak_usd;
                    if retrace >= self.callback {
                        return TrailOutcome {
                            decision: TrailDecision::Harvest {
                                peak_usd,
                                profit_usd: profit,
                                retrace,
                            },
                            next,
                        };
                    }
                }

                if profit < self.reset_floor {
                    return TrailOutcome {
                        decision: TrailDecision::Reset { peak_usd },
                        next: TrailState::Inactive,
                    };
                }

                let decision = if raised {
                    TrailDecision::Raised { peak_usd }
                } else {
                    TrailDecision::Hold
                };
                TrailOutcome { decision, next }
            }
        }
    }
}
