use tokio::time::Duration;

/// A single step of a ramping schedule.
///
/// Over `duration` the number of virtual users moves linearly from the
/// previous stage's target (or the start VU count) to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Represents the virtual-user schedule for a load test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadModel {
    /// A fixed number of VUs for a fixed duration.
    ConstantVus { vus: u64, duration: Duration },

    /// VU count follows a list of stages, interpolating linearly inside
    /// each one.
    RampingVus { start_vus: u64, stages: Vec<Stage> },
}

impl LoadModel {
    /// Total wall-clock length of the schedule.
    pub fn total_duration(&self) -> Duration {
        match self {
            LoadModel::ConstantVus { duration, .. } => *duration,
            LoadModel::RampingVus { stages, .. } => stages.iter().map(|s| s.duration).sum(),
        }
    }

    /// Highest VU count the schedule will ever ask for.
    pub fn max_vus(&self) -> u64 {
        match self {
            LoadModel::ConstantVus { vus, .. } => *vus,
            LoadModel::RampingVus { start_vus, stages } => stages
                .iter()
                .map(|s| s.target)
                .fold(*start_vus, u64::max),
        }
    }

    /// Index of the stage active at `elapsed`, or None once the schedule has ended.
    pub fn stage_at(&self, elapsed: Duration) -> Option<usize> {
        match self {
            LoadModel::ConstantVus { duration, .. } => (elapsed < *duration).then_some(0),
            LoadModel::RampingVus { stages, .. } => {
                let mut stage_end = Duration::ZERO;
                for (idx, stage) in stages.iter().enumerate() {
                    stage_end += stage.duration;
                    if elapsed < stage_end {
                        return Some(idx);
                    }
                }
                None
            }
        }
    }

    /// Calculates the target number of VUs at `elapsed` since test start.
    ///
    /// Fractional values are rounded down. After the last stage the final
    /// target is returned.
    pub fn target_vus_at(&self, elapsed: Duration) -> u64 {
        match self {
            LoadModel::ConstantVus { vus, duration } => {
                if elapsed < *duration {
                    *vus
                } else {
                    0
                }
            }
            LoadModel::RampingVus { start_vus, stages } => {
                let mut from = *start_vus;
                let mut stage_start = Duration::ZERO;

                for stage in stages {
                    let stage_end = stage_start + stage.duration;
                    if elapsed < stage_end {
                        let into_stage = (elapsed - stage_start).as_secs_f64();
                        return Self::linear_interpolate(
                            from as f64,
                            stage.target as f64,
                            into_stage,
                            stage.duration.as_secs_f64(),
                        )
                        .floor() as u64;
                    }
                    from = stage.target;
                    stage_start = stage_end;
                }

                from
            }
        }
    }

    fn linear_interpolate(from: f64, to: f64, elapsed: f64, duration: f64) -> f64 {
        if duration <= 0.0 {
            return to;
        }
        from + (to - from) * (elapsed / duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn default_ramp() -> LoadModel {
        LoadModel::RampingVus {
            start_vus: 0,
            stages: vec![
                Stage::new(secs(2), 10),
                Stage::new(secs(2), 10),
                Stage::new(secs(2), 50),
                Stage::new(secs(3), 0),
            ],
        }
    }

    #[test]
    fn ramp_interpolates_within_stage() {
        let model = default_ramp();
        assert_eq!(model.target_vus_at(secs(0)), 0);
        assert_eq!(model.target_vus_at(secs(1)), 5);
        assert_eq!(model.target_vus_at(secs(2)), 10);
        assert_eq!(model.target_vus_at(secs(3)), 10);
        assert_eq!(model.target_vus_at(secs(5)), 30);
    }

    #[test]
    fn ramp_down_reaches_zero() {
        let model = default_ramp();
        assert_eq!(model.target_vus_at(Duration::from_millis(7500)), 25);
        assert_eq!(model.target_vus_at(secs(9)), 0);
        assert_eq!(model.target_vus_at(secs(60)), 0);
    }

    #[test]
    fn ramp_rounds_down() {
        let model = LoadModel::RampingVus {
            start_vus: 0,
            stages: vec![Stage::new(secs(3), 10)],
        };
        // 10 * (1/3) = 3.33
        assert_eq!(model.target_vus_at(secs(1)), 3);
    }

    #[test]
    fn start_vus_is_initial_level() {
        let model = LoadModel::RampingVus {
            start_vus: 4,
            stages: vec![Stage::new(secs(4), 0)],
        };
        assert_eq!(model.target_vus_at(secs(0)), 4);
        assert_eq!(model.target_vus_at(secs(2)), 2);
        assert_eq!(model.max_vus(), 4);
    }

    #[test]
    fn zero_duration_stage_jumps() {
        let model = LoadModel::RampingVus {
            start_vus: 0,
            stages: vec![Stage::new(Duration::ZERO, 20), Stage::new(secs(10), 20)],
        };
        assert_eq!(model.target_vus_at(secs(0)), 20);
        assert_eq!(model.target_vus_at(secs(5)), 20);
    }

    #[test]
    fn totals_and_max() {
        let model = default_ramp();
        assert_eq!(model.total_duration(), secs(9));
        assert_eq!(model.max_vus(), 50);

        let constant = LoadModel::ConstantVus {
            vus: 7,
            duration: secs(30),
        };
        assert_eq!(constant.total_duration(), secs(30));
        assert_eq!(constant.max_vus(), 7);
        assert_eq!(constant.target_vus_at(secs(10)), 7);
        assert_eq!(constant.target_vus_at(secs(30)), 0);
    }

    #[test]
    fn stage_index_lookup() {
        let model = default_ramp();
        assert_eq!(model.stage_at(secs(0)), Some(0));
        assert_eq!(model.stage_at(Duration::from_millis(2500)), Some(1));
        assert_eq!(model.stage_at(secs(8)), Some(3));
        assert_eq!(model.stage_at(secs(9)), None);
    }
}
