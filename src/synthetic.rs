use crate::frame::{DataPacket, NUM_CHANNELS};
use std::f64::consts::FRAC_PI_4;

const PHASE_STEP: f64 = 0.2;

/// Deterministic source of sine-wave packets for running without hardware.
///
/// Channel `i` carries `round((sin(t + i * pi/4) + 1) * 50)`, so values stay within 0..=100.
#[derive(Debug, Clone, Default)]
pub struct SyntheticSignalGenerator {
    t: f64,
}

impl SyntheticSignalGenerator {
    pub fn new() -> Self {
        SyntheticSignalGenerator { t: 0.0 }
    }

    /// Current phase.
    pub fn phase(&self) -> f64 {
        self.t
    }

    /// Restarts the sequence from phase 0.
    pub fn reset(&mut self) {
        self.t = 0.0;
    }

    pub fn next_packet(&mut self) -> DataPacket {
        let mut channels = [0i32; NUM_CHANNELS];
        for (i, channel) in channels.iter_mut().enumerate() {
            let phase = self.t + i as f64 * FRAC_PI_4;
            *channel = ((phase.sin() + 1.0) * 50.0).round() as i32;
        }
        self.t += PHASE_STEP;
        DataPacket::encode(&channels)
    }
}

impl Iterator for SyntheticSignalGenerator {
    type Item = DataPacket;

    fn next(&mut self) -> Option<DataPacket> {
        Some(self.next_packet())
    }
}
