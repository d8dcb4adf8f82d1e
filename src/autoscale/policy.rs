//! Scaling decision logic.
//!
//! A pure function of the metrics window, the current instance count and the
//! configured thresholds. Cooldowns are applied by the caller.
//!
//! ```text
//! fewer than 3 samples                     → NoChange
//! mean(last 3) cpu > target_cpu
//!   or mean(last 3) mem > target_mem,
//!   and instances < max                    → ScaleUp
//! mean(last 5) cpu < target_cpu / 2
//!   and mean(last 5) mem < target_mem / 2,
//!   and instances > min                    → ScaleDown
//! ```

use crate::autoscale::window::MetricsWindow;
use crate::config::AutoScalingConfig;

/// Samples averaged for a scale-up decision.
pub const SCALE_UP_SAMPLES: usize = 3;

/// Samples averaged for a scale-down decision.
pub const SCALE_DOWN_SAMPLES: usize = 5;

/// Minimum samples before any decision is made.
pub const MIN_SAMPLES: usize = 3;

/// Fraction of target below which the fleet is considered idle.
const SCALE_DOWN_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    ScaleUp,
    ScaleDown,
    NoChange,
}

pub fn evaluate(
    window: &MetricsWindow,
    current_instances: usize,
    config: &AutoScalingConfig,
) -> ScaleDecision {
    if window.len() < MIN_SAMPLES {
        return ScaleDecision::NoChange;
    }

    if current_instances < config.max_instances {
        let cpu = window.recent_mean(SCALE_UP_SAMPLES, |m| m.cpu_utilization);
        let memory = window.recent_mean(SCALE_UP_SAMPLES, |m| m.memory_utilization);
        if let (Some(cpu), Some(memory)) = (cpu, memory) {
            if cpu > config.target_cpu_utilization || memory > config.target_memory_utilization {
                return ScaleDecision::ScaleUp;
            }
        }
    }

    if current_instances > config.min_instances {
        let cpu = window.recent_mean(SCALE_DOWN_SAMPLES, |m| m.cpu_utilization);
        let memory = window.recent_mean(SCALE_DOWN_SAMPLES, |m| m.memory_utilization);
        if let (Some(cpu), Some(memory)) = (cpu, memory) {
            if cpu < config.target_cpu_utilization * SCALE_DOWN_RATIO
                && memory < config.target_memory_utilization * SCALE_DOWN_RATIO
            {
                return ScaleDecision::ScaleDown;
            }
        }
    }

    ScaleDecision::NoChange
}
