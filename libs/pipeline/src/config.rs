use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Ёмкость каналов `in` и `out` по умолчанию: ближе всего к unbuffered.
pub const DEFAULT_BUFFER: usize = 1;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_millis(1000);

// ═══════════════════════════════════════════════════════════════
//  Overflow policy
// ═══════════════════════════════════════════════════════════════

/// Стратегия ingress при переполненном канале `in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(): при полном канале сообщение дропается, warn в лог.
    Drop,
    /// send().await: dispatcher ждёт места (back-pressure до брокера).
    #[default]
    #[serde(alias = "backpressure")]
    BackPressure,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(OverflowPolicy::Drop),
            "back_pressure" | "backpressure" | "back-pressure" => Ok(OverflowPolicy::BackPressure),
            other => Err(format!("unknown overflow policy '{other}' (expected drop or back_pressure)")),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverflowPolicy::Drop => "drop",
            OverflowPolicy::BackPressure => "back_pressure",
        })
    }
}
