/// Nonlinear channel mixer using the two standard lookup tables. Output is
/// centred on zero and scaled to the `i16` range.
#[derive(Debug, Clone)]
pub struct Mixer {
    square: [i32; 31],
    tnd: [i32; 203],
}

const FULL_SCALE: f64 = 65535.0;

impl Default for Mixer {
    fn default() -> Self {
        let mut square = [0i32; 31];
        for (i, slot) in square.iter_mut().enumerate().skip(1) {
            *slot = (95.52 / (8128.0 / i as f64 + 100.0) * FULL_SCALE) as i32;
        }
        let mut tnd = [0i32; 203];
        for (i, slot) in tnd.iter_mut().enumerate().skip(1) {
            *slot = (163.67 / (24329.0 / i as f64 + 100.0) * FULL_SCALE) as i32;
        }
        Self { square, tnd }
    }
}

impl Mixer {
    pub fn mix(&self, pulse1: u8, pulse2: u8, triangle: u8, noise: u8, dmc: u8) -> i16 {
        let square = self.square[(pulse1 as usize + pulse2 as usize).min(30)];
        let tnd_index = 3 * triangle as usize + 2 * noise as usize + dmc as usize;
        let tnd = self.tnd[tnd_index.min(202)];
        let level = square + tnd - (FULL_SCALE as i32 / 2);
        level.clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_sits_at_negative_half_scale() {
        let mixer = Mixer::default();
        assert_eq!(mixer.mix(0, 0, 0, 0, 0), -32767);
    }

    #[test]
    fn output_is_monotonic_in_each_channel() {
        let mixer = Mixer::default();
        assert!(mixer.mix(15, 0, 0, 0, 0) > mixer.mix(8, 0, 0, 0, 0));
        assert!(mixer.mix(0, 0, 15, 0, 0) > mixer.mix(0, 0, 0, 15, 0));
        assert!(mixer.mix(0, 0, 0, 0, 127) > mixer.mix(0, 0, 0, 0, 64));
    }

    #[test]
    fn full_output_stays_in_range() {
        let mixer = Mixer::default();
        let loud = mixer.mix(15, 15, 15, 15, 127);
        assert!(loud > 0);
        assert!(loud <= i16::MAX);
    }
}
