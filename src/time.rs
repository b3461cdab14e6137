use std::time::Duration;

/// Session clock driven by the host loop. The panel never reads wall time, so every participant
/// (and every test) advances it explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanelClock {
    now: Duration,
}

impl PanelClock {
    pub fn advance(&mut self, dt: Duration) {
        self.now += dt;
    }

    pub fn now(&self) -> Duration {
        self.now
    }
}
