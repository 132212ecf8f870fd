// src/fx_components/reverb.rs

//! A Schroeder-style reverb driven by a single gesture intensity value.
//!
//! Internally a network of delay lines (comb filters) and phase diffusers
//! (all-pass filters). Decay length, wet/dry mix, and damping are all
//! continuous monotonic functions of the intensity passed to each
//! `process` call: higher intensity means a longer, wetter, brighter tail.
//! Filter history carries over between blocks, so consecutive blocks sound
//! exactly as if the stream had been processed in one piece.

// Per-sample smoothing of the incoming intensity, to prevent clicks when the
// hand jumps between blocks.
const SMOOTHING_COEFF: f32 = 0.9995;

/// A simple one-pole low-pass filter, used for damping the reverb tail.
#[derive(Debug, Clone, Copy, Default)]
struct DampingFilter {
    z1: f32,
}
impl DampingFilter {
    #[inline(always)]
    fn process(&mut self, input: f32, coeff: f32) -> f32 {
        let output = input * (1.0 - coeff) + self.z1 * coeff;
        self.z1 = output;
        output
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
    }
}

/// A delay line with feedback, a core part of a reverb's sound.
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    damping_filter: DampingFilter,
}
impl CombFilter {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
            damping_filter: DampingFilter::default(),
        }
    }

    #[inline(always)]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let output = self.buffer[self.write_pos];
        let damped_output = self.damping_filter.process(output, damping);
        self.buffer[self.write_pos] = input + damped_output * feedback;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.damping_filter.reset();
    }
}

/// A filter that smears the phase of a signal, used to increase echo density.
#[derive(Debug, Clone)]
struct AllPassFilter {
    buffer: Vec<f32>,
    write_pos: usize,
}
impl AllPassFilter {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
        }
    }

    #[inline(always)]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.write_pos];
        let output = -input + delayed;
        self.buffer[self.write_pos] = input + delayed * 0.5; // G = 0.5 (fixed)
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

// --- Main Public Reverb Struct ---

#[derive(Debug)]
pub struct Reverb {
    comb_filters: [CombFilter; 4],
    all_pass_filters: [AllPassFilter; 2],
    smoothed_intensity: f32,
    /// Minimum output peak relative to the input peak; a non-silent block is
    /// rescaled up to this floor so a hot wet mix can never fade the loop
    /// into inaudibility.
    normalization_floor: f32,
}

impl Reverb {
    pub fn new(sample_rate: f32, normalization_floor: f32) -> Self {
        let sr_factor = sample_rate / 44100.0;
        // Prime numbers are good for delay lengths to avoid periodic artifacts.
        let base_comb_delays = [1117.0, 1187.0, 1277.0, 1351.0];
        let base_allpass_delays = [223.0, 557.0];

        Self {
            comb_filters: [
                CombFilter::new((base_comb_delays[0] * sr_factor) as usize),
                CombFilter::new((base_comb_delays[1] * sr_factor) as usize),
                CombFilter::new((base_comb_delays[2] * sr_factor) as usize),
                CombFilter::new((base_comb_delays[3] * sr_factor) as usize),
            ],
            all_pass_filters: [
                AllPassFilter::new((base_allpass_delays[0] * sr_factor) as usize),
                AllPassFilter::new((base_allpass_delays[1] * sr_factor) as usize),
            ],
            smoothed_intensity: 0.0,
            normalization_floor: normalization_floor.clamp(0.0, 1.0),
        }
    }

    /// Processes one block in place. `intensity` in [0, 1] (clamped) sets the
    /// reverb character for this block; the value is smoothed per sample so a
    /// jump between blocks cannot click. No allocation.
    pub fn process(&mut self, block: &mut [f32], intensity: f32) {
        let target = intensity.clamp(0.0, 1.0);
        let input_peak = block.iter().fold(0.0f32, |max, &s| max.max(s.abs()));

        for sample in block.iter_mut() {
            self.smoothed_intensity = SMOOTHING_COEFF * self.smoothed_intensity
                + (1.0 - SMOOTHING_COEFF) * target;
            let s = self.smoothed_intensity;

            // Monotonic intensity mappings: longer decay, wetter mix, and
            // less damping as the hand rises.
            let feedback = 0.55 + 0.43 * s;
            let damping = 0.5 - 0.35 * s;
            let wet_mix = 0.2 + 0.7 * s;

            let dry = *sample;
            let comb_out = self
                .comb_filters
                .iter_mut()
                .map(|f| f.process(dry, feedback, damping))
                .sum::<f32>()
                * 0.25; // Average the parallel comb filters

            let wet = self
                .all_pass_filters
                .iter_mut()
                .fold(comb_out, |acc, f| f.process(acc));

            *sample = dry * (1.0 - wet_mix) + wet * wet_mix;
        }

        // A heavy wet mix can collapse the block's level; pull it back up to
        // the configured floor relative to the input peak.
        let output_peak = block.iter().fold(0.0f32, |max, &s| max.max(s.abs()));
        let floor_peak = input_peak * self.normalization_floor;
        if input_peak > 1e-6 && output_peak > 1e-9 && output_peak < floor_peak {
            let gain = floor_peak / output_peak;
            for sample in block.iter_mut() {
                *sample *= gain;
            }
        }

        for sample in block.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    /// Clears all delay-line and smoothing history. Called on an explicit
    /// engine reset, not on every mode change: effect continuity across
    /// gestures matters more than a hard cut to silence.
    pub fn reset(&mut self) {
        for comb in self.comb_filters.iter_mut() {
            comb.reset();
        }
        for allpass in self.all_pass_filters.iter_mut() {
            allpass.reset();
        }
        self.smoothed_intensity = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 256;

    fn test_signal(blocks: usize) -> Vec<Vec<f32>> {
        (0..blocks)
            .map(|b| {
                (0..BLOCK)
                    .map(|i| {
                        let t = (b * BLOCK + i) as f32;
                        (t * 0.05).sin() * 0.5
                    })
                    .collect()
            })
            .collect()
    }

    /// Energy of the decaying tail after a single impulse block, with the
    /// given constant intensity.
    fn tail_energy(intensity: f32) -> f64 {
        let mut reverb = Reverb::new(44100.0, 0.0);
        let mut impulse = vec![0.0f32; BLOCK];
        impulse[0] = 1.0;
        reverb.process(&mut impulse, intensity);

        let mut energy = 0.0f64;
        for _ in 0..40 {
            let mut silence = vec![0.0f32; BLOCK];
            reverb.process(&mut silence, intensity);
            energy += silence.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>();
        }
        energy
    }

    #[test]
    fn reset_makes_processing_deterministic() {
        let mut reverb = Reverb::new(44100.0, 0.85);
        let blocks = test_signal(4);

        let mut first = Vec::new();
        for block in &blocks {
            let mut b = block.clone();
            reverb.process(&mut b, 0.6);
            first.push(b);
        }

        reverb.reset();
        let mut second = Vec::new();
        for block in &blocks {
            let mut b = block.clone();
            reverb.process(&mut b, 0.6);
            second.push(b);
        }

        assert_eq!(first, second);
    }

    #[test]
    fn wet_energy_never_decreases_with_intensity() {
        let mut prev = -1.0f64;
        for step in 0..=4 {
            let intensity = step as f32 / 4.0;
            let energy = tail_energy(intensity);
            assert!(
                energy >= prev,
                "tail energy fell from {prev} to {energy} at intensity {intensity}"
            );
            prev = energy;
        }
    }

    #[test]
    fn history_carries_across_block_boundaries() {
        let mut reverb = Reverb::new(44100.0, 0.0);
        let mut impulse = vec![0.0f32; BLOCK];
        impulse[0] = 1.0;
        reverb.process(&mut impulse, 0.8);

        let mut silence = vec![0.0f32; BLOCK * 4];
        reverb.process(&mut silence, 0.8);
        let tail: f32 = silence.iter().map(|s| s.abs()).sum();
        assert!(tail > 0.0, "tail died at the block boundary");
    }

    #[test]
    fn output_stays_in_range() {
        let mut reverb = Reverb::new(44100.0, 0.85);
        for block in &mut test_signal(8) {
            for sample in block.iter_mut() {
                *sample *= 2.0; // deliberately hot input
            }
            reverb.process(block, 1.0);
            for &sample in block.iter() {
                assert!((-1.0..=1.0).contains(&sample));
            }
        }
    }

    #[test]
    fn peak_floor_renormalization_keeps_output_audible() {
        // With a wet mix near maximum the first processed block is mostly
        // pre-delay silence; the floor has to pull its peak back up.
        let mut reverb = Reverb::new(44100.0, 0.85);
        let mut block: Vec<f32> = (0..BLOCK).map(|i| ((i as f32) * 0.3).sin() * 0.5).collect();
        let input_peak = block.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        reverb.process(&mut block, 1.0);
        let output_peak = block.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!(output_peak >= input_peak * 0.85 - 1e-4);
    }

    #[test]
    fn silence_in_silence_out_without_history() {
        let mut reverb = Reverb::new(44100.0, 0.85);
        let mut block = vec![0.0f32; BLOCK];
        reverb.process(&mut block, 0.5);
        assert!(block.iter().all(|&s| s == 0.0));
    }
}
