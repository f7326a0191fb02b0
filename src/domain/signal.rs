use serde::{Deserialize, Serialize};

/// How convincing a readiness signal is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    Weak,
    Medium,
    Strong,
}

impl std::fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalStrength::Weak => write!(f, "weak"),
            SignalStrength::Medium => write!(f, "medium"),
            SignalStrength::Strong => write!(f, "strong"),
        }
    }
}

/// Answer of the entry readiness oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessVerdict {
    pub ready: bool,
    pub reason: String,
    pub strength: Option<SignalStrength>,
}

impl ReadinessVerdict {
    pub fn ready(strength: SignalStrength, reason: impl Into<String>) -> Self {
        Self {
            ready: true,
            reason: reason.into(),
            strength: Some(strength),
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            ready: false,
            reason: reason.into(),
            strength: None,
        }
    }
}

/// Higher-timeframe trend check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendVerdict {
    pub ok_to_short: bool,
    pub reason: String,
}

/// Sentiment check for large pumps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentVerdict {
    pub is_good: bool,
    pub reason: String,
}
