use std::time::Duration;

use crate::d3d9::NativeRect;
use crate::game::{Game, GameContext, GameTime};

const SIZE: i32 = 24;
const PULSE_PERIOD: f32 = 2.0;

///Small game that proves the loop is alive: a pulsing square in the top left corner of the back
///buffer and an FPS line in the log.
#[derive(Debug, Default)]
pub struct PulseGame {
    frames: u32,
    since_report: Duration,
}

impl PulseGame {
    pub fn new() -> Self {
        Self::default()
    }

    ///Opaque ARGB, green brightness following a sine of `total`.
    pub fn color_at(total: Duration) -> u32 {
        let phase = total.as_secs_f32() / PULSE_PERIOD * std::f32::consts::TAU;
        let level = ((phase.sin() * 0.5 + 0.5) * 255.0).round() as u32;
        0xFF00_0000 | (level << 8) | 0x20
    }
}

impl Game for PulseGame {
    fn initialize(&mut self, _: &mut GameContext) -> anyhow::Result<()> {
        log::info!("PulseGame initialized");
        Ok(())
    }

    fn update(&mut self, _: &mut GameContext, time: &GameTime) -> anyhow::Result<()> {
        self.frames += 1;
        self.since_report += time.elapsed;

        if self.since_report >= Duration::from_secs(1) {
            let fps = self.frames as f64 / self.since_report.as_secs_f64();
            log::info!("{:.1} fps", fps);
            self.frames = 0;
            self.since_report = Duration::ZERO;
        }
        Ok(())
    }

    fn draw(&mut self, context: &mut GameContext, time: &GameTime) -> anyhow::Result<()> {
        let device = context.graphics_device()?;
        let corner = NativeRect {
            x1: 0,
            y1: 0,
            x2: SIZE,
            y2: SIZE,
        };
        device.clear(&[corner], Self::color_at(time.total))?;
        Ok(())
    }
}
