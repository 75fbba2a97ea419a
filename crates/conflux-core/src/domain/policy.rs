use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation policy of a dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    JoinAll,
    CompletionOrder,
    FailFast,
    FailPartial,
    FailSoft,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JoinAll => "join_all",
            Self::CompletionOrder => "completion_order",
            Self::FailFast => "fail_fast",
            Self::FailPartial => "fail_partial",
            Self::FailSoft => "fail_soft",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
