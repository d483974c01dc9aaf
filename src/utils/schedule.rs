//! Update scheduling for the CPR setup phases.
//!
//! Rebuilding the multigrid hierarchy every Newton iteration is wasteful;
//! the schedule decides, from the outer solver's progress, whether a given
//! `update` call performs a full rebuild, a cheap numeric refresh, or
//! nothing at all for the pressure subsystem.

use crate::context::Recorder;
use crate::error::CprError;
use std::str::FromStr;

/// Granularity at which a refresh may trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateInterval {
    /// Only on the very first call.
    Once,
    /// Every nonlinear iteration.
    Iteration,
    /// First iteration of every ministep.
    Ministep,
    /// First iteration of every outer step.
    Step,
}

impl FromStr for UpdateInterval {
    type Err = CprError;
    fn from_str(s: &str) -> Result<Self, CprError> {
        match s {
            "once" => Ok(UpdateInterval::Once),
            "iteration" => Ok(UpdateInterval::Iteration),
            "ministep" => Ok(UpdateInterval::Ministep),
            "step" => Ok(UpdateInterval::Step),
            other => Err(CprError::BadScheduleConfig(other.to_string())),
        }
    }
}

/// When to refresh: an interval plus a frequency within that interval.
/// `frequency = k` fires on the 1st, (k+1)th, (2k+1)th, ... occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSchedule {
    pub interval: UpdateInterval,
    pub frequency: usize,
}

impl UpdateSchedule {
    pub fn new(interval: UpdateInterval, frequency: usize) -> Self {
        debug_assert!(frequency >= 1);
        Self { interval, frequency }
    }

    /// Whether this call should refresh. The first call on a freshly
    /// constructed preconditioner always does, whatever the interval.
    pub fn should_update(&self, recorder: &dyn Recorder, first_call: bool) -> bool {
        if first_call {
            return true;
        }
        let (criterion, counter) = match self.interval {
            UpdateInterval::Once => return false,
            UpdateInterval::Iteration => (true, recorder.subiteration()),
            UpdateInterval::Ministep => (recorder.subiteration() == 1, recorder.ministep()),
            UpdateInterval::Step => (recorder.subiteration() == 1, recorder.step()),
        };
        criterion && (self.frequency == 1 || counter % self.frequency == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::IterationRecorder;

    #[test]
    fn iteration_interval_frequency() {
        let every = UpdateSchedule::new(UpdateInterval::Iteration, 1);
        let rec = IterationRecorder::new(1, 1, 3);
        assert!(every.should_update(&rec, false));

        let alternate = UpdateSchedule::new(UpdateInterval::Iteration, 2);
        let rec2 = IterationRecorder::new(1, 1, 2);
        assert!(!alternate.should_update(&rec2, false));
        let rec3 = IterationRecorder::new(1, 1, 3);
        assert!(alternate.should_update(&rec3, false));
    }

    #[test]
    fn first_call_always_fires() {
        let once = UpdateSchedule::new(UpdateInterval::Once, 1);
        let rec = IterationRecorder::new(7, 3, 5);
        assert!(once.should_update(&rec, true));
        assert!(!once.should_update(&rec, false));
    }

    #[test]
    fn ministep_and_step_gate_on_first_iteration() {
        let per_step = UpdateSchedule::new(UpdateInterval::Step, 1);
        assert!(per_step.should_update(&IterationRecorder::new(4, 1, 1), false));
        assert!(!per_step.should_update(&IterationRecorder::new(4, 1, 2), false));

        let per_mini = UpdateSchedule::new(UpdateInterval::Ministep, 2);
        // ministep 3: 3 mod 2 == 1 -> fires on its first iteration
        assert!(per_mini.should_update(&IterationRecorder::new(1, 3, 1), false));
        // ministep 2: 2 mod 2 == 0 -> suppressed
        assert!(!per_mini.should_update(&IterationRecorder::new(1, 2, 1), false));
    }

    #[test]
    fn interval_parsing() {
        assert_eq!("step".parse::<UpdateInterval>().unwrap(), UpdateInterval::Step);
        assert_eq!("iteration".parse::<UpdateInterval>().unwrap(), UpdateInterval::Iteration);
        assert!(matches!(
            "weekly".parse::<UpdateInterval>(),
            Err(CprError::BadScheduleConfig(_))
        ));
    }
}
