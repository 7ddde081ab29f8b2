use crate::events::EngineEvent;
use crate::runtime::EngineRuntime;

pub const SIM_DT: f64 = 1.0 / 30.0;
pub const MAX_TICKS_PER_FRAME: u32 = 5;

/// Accumulator driver turning wall-clock frames into fixed simulation steps.
#[derive(Debug, Clone)]
pub struct FixedStepLoop {
    sim_dt: f64,
    max_ticks_per_frame: u32,
    accumulator: f64,
    engine_tick: u64,
}

impl Default for FixedStepLoop {
    fn default() -> Self {
        Self::new(SIM_DT, MAX_TICKS_PER_FRAME)
    }
}

impl FixedStepLoop {
    pub fn new(sim_dt: f64, max_ticks_per_frame: u32) -> Self {
        Self {
            sim_dt,
            max_ticks_per_frame: max_ticks_per_frame.max(1),
            accumulator: 0.0,
            engine_tick: 0,
        }
    }

    pub fn engine_tick(&self) -> u64 {
        self.engine_tick
    }

    pub fn sim_dt(&self) -> f64 {
        self.sim_dt
    }

    /// Feeds `real_dt` seconds and runs as many whole steps as fit, up to the
    /// per-frame cap. Time beyond the cap is shed as dropped ticks.
    ///
    /// `tick` receives the runtime, the fixed step and the tick index. Returns
    /// the number of steps run.
    pub fn frame<F>(&mut self, real_dt: f64, rt: &mut EngineRuntime, mut tick: F) -> u32
    where
        F: FnMut(&mut EngineRuntime, f64, u64),
    {
        if real_dt.is_finite() && real_dt > 0.0 {
            self.accumulator += real_dt;
        }

        let max_accum = self.sim_dt * f64::from(self.max_ticks_per_frame);
        if self.accumulator > max_accum {
            let dropped = ((self.accumulator - max_accum) / self.sim_dt).floor() as u64;
            self.accumulator = max_accum;
            if dropped > 0 {
                rt.metrics.dropped_ticks_total += dropped;
                rt.push_event(EngineEvent::SimDroppedTicks {
                    tick: self.engine_tick,
                    dropped,
                });
            }
        }

        let mut ran = 0;
        while self.accumulator >= self.sim_dt && ran < self.max_ticks_per_frame {
            tick(rt, self.sim_dt, self.engine_tick);
            self.accumulator -= self.sim_dt;
            self.engine_tick += 1;
            ran += 1;
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_whole_steps_and_keeps_remainder() {
        let mut rt = EngineRuntime::default();
        let mut lp = FixedStepLoop::new(0.25, 4);
        let mut seen = Vec::new();
        assert_eq!(lp.frame(0.625, &mut rt, |_, _, t| seen.push(t)), 2);
        assert_eq!(lp.frame(0.125, &mut rt, |_, _, t| seen.push(t)), 1);
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(rt.metrics().dropped_ticks_total, 0);
    }

    #[test]
    fn stall_is_shed_as_dropped_ticks() {
        let mut rt = EngineRuntime::default();
        let mut lp = FixedStepLoop::new(0.25, 4);
        let ran = lp.frame(3.0, &mut rt, |_, dt, _| assert_eq!(dt, 0.25));
        assert_eq!(ran, 4);
        assert_eq!(rt.metrics().dropped_ticks_total, 8);
        assert_eq!(lp.engine_tick(), 4);
        assert!(matches!(
            rt.events().last(),
            Some(EngineEvent::SimDroppedTicks { dropped: 8, .. })
        ));
    }

    #[test]
    fn ignores_negative_and_nan_frames() {
        let mut rt = EngineRuntime::default();
        let mut lp = FixedStepLoop::default();
        assert_eq!(lp.frame(-1.0, &mut rt, |_, _, _| {}), 0);
        assert_eq!(lp.frame(f64::NAN, &mut rt, |_, _, _| {}), 0);
    }
}
