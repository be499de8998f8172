use std::time::{Duration, Instant};

const FPS_WINDOW: Duration = Duration::from_secs(1);

pub struct FrameClock {
    last: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f32 {
        let dt = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        dt
    }

    // Skips the time spent suspended so the first frame back is not one huge step
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FpsCounter {
    frames: u32,
    window_start: Instant,
    last_fps: u32,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
            last_fps: 0,
        }
    }

    pub fn last_fps(&self) -> u32 {
        self.last_fps
    }

    // Counts one frame ending at `now`; returns the new rate when the
    // measurement window closes.
    pub fn frame(&mut self, now: Instant) -> Option<u32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed <= FPS_WINDOW {
            return None;
        }

        let elapsed_ms = elapsed.as_secs_f32() * 1000.0;
        self.last_fps = (self.frames as f32 * (1000.0 / elapsed_ms)) as u32;
        self.frames = 0;
        self.window_start = now;
        Some(self.last_fps)
    }
}
