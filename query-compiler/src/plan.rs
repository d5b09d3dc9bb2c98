use crate::range::Clock;
use serde::{Deserialize, Serialize};
use timeseries::timestamp::parse_timestamp;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Payg,
    Team,
    Enterprise,
}

/// How far back a plan may query logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimit {
    pub text: &'static str,
    pub days: i64,
    pub prompt_upgrade: bool,
}

impl Plan {
    pub fn query_limit(&self) -> QueryLimit {
        match self {
            Self::Free => QueryLimit {
                text: "1 day",
                days: 1,
                prompt_upgrade: true,
            },
            Self::Pro | Self::Payg => QueryLimit {
                text: "7 days",
                days: 7,
                prompt_upgrade: true,
            },
            Self::Team => QueryLimit {
                text: "28 days",
                days: 28,
                prompt_upgrade: true,
            },
            Self::Enterprise => QueryLimit {
                text: "90 days",
                days: 90,
                prompt_upgrade: false,
            },
        }
    }
}

/// Whether a range starting at `from` reaches further back than the plan
/// allows and the plan has something to upgrade to. Unparseable timestamps
/// never prompt.
pub fn should_show_upgrade_prompt(from: &str, plan: Plan, clock: &dyn Clock) -> bool {
    let limit = plan.query_limit();
    if !limit.prompt_upgrade {
        return false;
    }
    let Some(from) = parse_timestamp(from) else {
        return false;
    };
    let days = (clock.now() - from).num_days().abs();
    days > limit.days
}
