use crate::sprite::TextureRegion;

// Seconds between batches while the pointer is held
pub const SPAWN_INTERVAL: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HoldState {
    Idle,
    Holding { elapsed: f32 },
}

// Turns pointer press/release events into batch spawns.
// A press is latched until the next `SpawnController::tick`, so a click that
// starts and ends between two frames still produces one hold session.
#[derive(Clone, Debug)]
pub struct SpawnController {
    state: HoldState,
    pressed: bool,
    press_latched: bool,
    region: TextureRegion,
    interval: f32,
}

impl Default for SpawnController {
    fn default() -> Self {
        Self::new(SPAWN_INTERVAL)
    }
}

impl SpawnController {
    pub fn new(interval: f32) -> Self {
        Self {
            state: HoldState::Idle,
            pressed: false,
            press_latched: false,
            region: TextureRegion::default(),
            interval,
        }
    }

    pub fn press(&mut self) {
        if !self.pressed {
            self.pressed = true;
            self.press_latched = true;
        }
    }

    pub fn release(&mut self) {
        self.pressed = false;
    }

    pub fn state(&self) -> HoldState {
        self.state
    }

    pub fn region(&self) -> TextureRegion {
        self.region
    }

    // Advances the hold timer and returns how many batches to spawn now.
    pub fn tick(&mut self, dt: f32) -> u32 {
        let holding = self.pressed || self.press_latched;
        self.press_latched = false;

        match (self.state, holding) {
            (HoldState::Idle, true) => {
                self.state = HoldState::Holding { elapsed: dt };
                1
            }
            (HoldState::Holding { elapsed }, true) if self.pressed => {
                let mut elapsed = elapsed + dt;
                let spawned = if elapsed > self.interval {
                    elapsed -= self.interval;
                    1
                } else {
                    0
                };
                self.state = HoldState::Holding { elapsed };
                spawned
            }
            (HoldState::Holding { .. }, _) => {
                self.state = HoldState::Idle;
                self.region = self.region.next();
                0
            }
            (HoldState::Idle, false) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn elapsed(controller: &SpawnController) -> f32 {
        match controller.state() {
            HoldState::Holding { elapsed } => elapsed,
            HoldState::Idle => panic!("controller is idle"),
        }
    }

    #[test]
    fn press_spawns_immediately_without_threshold_check() {
        let mut controller = SpawnController::default();
        controller.press();

        assert_eq!(controller.tick(0.25), 1);
        assert_relative_eq!(elapsed(&controller), 0.25);
    }

    #[test]
    fn held_press_spawns_each_interval_and_keeps_overflow() {
        let mut controller = SpawnController::default();
        controller.press();
        assert_eq!(controller.tick(0.25), 1);

        assert_eq!(controller.tick(0.05), 1);
        assert_relative_eq!(elapsed(&controller), 0.2, epsilon = 1e-6);

        assert_eq!(controller.tick(0.05), 1);
        assert_relative_eq!(elapsed(&controller), 0.15, epsilon = 1e-6);

        assert_eq!(controller.tick(0.05), 1);
        assert_relative_eq!(elapsed(&controller), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn short_frames_accumulate_before_spawning() {
        let mut controller = SpawnController::default();
        controller.press();
        assert_eq!(controller.tick(0.0), 1);

        let spawned: u32 = (0..10).map(|_| controller.tick(0.016)).sum();
        // 0.16s held: one crossing at 0.112
        assert_eq!(spawned, 1);
        assert_relative_eq!(elapsed(&controller), 0.06, epsilon = 1e-5);
    }

    #[test]
    fn release_returns_to_idle_and_cycles_region() {
        let mut controller = SpawnController::default();
        for expected in [1, 2, 3, 4, 0, 1] {
            controller.press();
            controller.tick(0.016);
            controller.release();
            assert_eq!(controller.tick(0.016), 0);
            assert_eq!(controller.state(), HoldState::Idle);
            assert_eq!(controller.region().index(), expected);
        }
    }

    #[test]
    fn click_between_frames_is_latched() {
        let mut controller = SpawnController::default();
        controller.press();
        controller.release();

        assert_eq!(controller.tick(0.016), 1);
        assert_eq!(controller.tick(0.016), 0);
        assert_eq!(controller.state(), HoldState::Idle);
        assert_eq!(controller.region().index(), 1);
    }

    #[test]
    fn repeated_press_while_holding_is_ignored() {
        let mut controller = SpawnController::default();
        controller.press();
        assert_eq!(controller.tick(0.01), 1);
        controller.press();
        assert_eq!(controller.tick(0.01), 0);
        assert_relative_eq!(elapsed(&controller), 0.02, epsilon = 1e-6);
    }

    #[test]
    fn idle_without_input_never_spawns() {
        let mut controller = SpawnController::default();
        let spawned: u32 = (0..100).map(|_| controller.tick(0.5)).sum();
        assert_eq!(spawned, 0);
        assert_eq!(controller.region().index(), 0);
    }
}
