//! Core emulator primitives and traits.

pub mod audio;
pub mod cpu_6502;
pub mod logging;
pub mod state;
pub mod types {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Frame {
        pub width: u32,
        pub height: u32,
        pub pixels: Vec<u32>,
    }

    impl Frame {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                pixels: vec![0; (width * height) as usize],
            }
        }

        #[inline]
        pub fn set_pixel(&mut self, x: u32, y: u32, argb: u32) {
            if x < self.width && y < self.height {
                self.pixels[(y * self.width + x) as usize] = argb;
            }
        }

        /// `None` outside the frame.
        pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
            if x < self.width && y < self.height {
                self.pixels.get((y * self.width + x) as usize).copied()
            } else {
                None
            }
        }
    }
}

use state::{StateError, StateReader, StateWriter};

/// Component state that can be written to and restored from a save-state blob.
///
/// `restore` must consume exactly what `snapshot` produced, in the same order.
pub trait Snapshot {
    fn snapshot(&self, out: &mut StateWriter);
    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError>;
}

/// A clocked hardware block driven by the console orchestrator.
///
/// The orchestrator lends each subsystem a borrowed view of whatever it may
/// touch during one step (`Bus`), and collects signals it raises (`Output`,
/// e.g. an interrupt line or consumed cycles). Subsystems never hold
/// references to each other.
pub trait Subsystem: Snapshot {
    type Bus<'a>;
    type Output;

    fn step(&mut self, bus: Self::Bus<'_>) -> Self::Output;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_initialization() {
        let f = types::Frame::new(10, 10);
        assert_eq!(f.pixels.len(), 100);
        assert_eq!(f.width, 10);
        assert_eq!(f.height, 10);
    }

    #[test]
    fn frame_set_pixel_ignores_out_of_bounds() {
        let mut f = types::Frame::new(4, 2);
        f.set_pixel(3, 1, 0xFF00FF00);
        f.set_pixel(4, 0, 0xFFFFFFFF);
        assert_eq!(f.pixel(3, 1), Some(0xFF00FF00));
        assert_eq!(f.pixel(4, 0), None);
        assert_eq!(f.pixel(0, 2), None);
        assert_eq!(f.pixels.iter().filter(|&&p| p != 0).count(), 1);
    }

    /// Counter that adds whatever the bus hands it.
    #[derive(Default)]
    struct Accumulator {
        total: u32,
    }

    impl Snapshot for Accumulator {
        fn snapshot(&self, out: &mut StateWriter) {
            out.write_u32(self.total);
        }

        fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
            self.total = input.read_u32()?;
            Ok(())
        }
    }

    impl Subsystem for Accumulator {
        type Bus<'a> = &'a [u32];
        type Output = u32;

        fn step(&mut self, bus: &[u32]) -> u32 {
            self.total += bus.iter().sum::<u32>();
            self.total
        }
    }

    #[test]
    fn mock_subsystem_snapshot_roundtrip() {
        let mut a = Accumulator::default();
        let inputs = [1, 2, 3];
        assert_eq!(a.step(&inputs), 6);

        let mut w = state::StateWriter::new();
        a.snapshot(&mut w);
        let bytes = w.into_bytes();

        let mut b = Accumulator::default();
        b.restore(&mut state::StateReader::new(&bytes)).unwrap();
        assert_eq!(b.step(&inputs), a.step(&inputs));
    }
}
