//! # Description
//! - the line buffers exposing a Kh x Kw window over a streamed feature map, one per input channel
//! - the mux selecting the windows of one input channel group
//!
//! a line buffer is Kh rows of Kw registers chained by Kh-1 sram fifos of depth `W - Kw`,
//! where `W` is the padded width. Every shifted pixel moves the whole chain by one, so the
//! window always covers the newest Kh x Kw neighborhood.

use std::collections::VecDeque;

use super::{
    fabric::Payload,
    metrics::{EnergyCounter, Metered, StageKind},
};
use crate::{
    models::{Cost, MemoryType, TechModel},
    net::WindowGeometry,
};

#[derive(Debug, Clone)]
pub struct LineBuffer {
    kh: usize,
    kw: usize,
    width: usize,
    /// the newest pixel is at the back
    chain: VecDeque<Payload>,
}

impl LineBuffer {
    pub fn new(geometry: &WindowGeometry) -> Self {
        let width = geometry.padded_width();
        let len = (geometry.kh - 1) * width + geometry.kw;
        LineBuffer {
            kh: geometry.kh,
            kw: geometry.kw,
            width,
            chain: std::iter::repeat(0.).take(len).collect(),
        }
    }

    /// the depth of each of the Kh-1 sram fifos
    pub fn sram_depth(&self) -> usize {
        self.width.saturating_sub(self.kw)
    }

    pub fn shift(&mut self, value: Payload) {
        self.chain.pop_front();
        self.chain.push_back(value);
    }

    /// the window in raster order, `window[r * Kw + c]`
    pub fn window(&self) -> Vec<Payload> {
        let mut window = Vec::with_capacity(self.kh * self.kw);
        self.window_into(&mut window);
        window
    }

    pub fn window_into(&self, out: &mut Vec<Payload>) {
        for r in 0..self.kh {
            let row_start = r * self.width;
            out.extend(self.chain.range(row_start..row_start + self.kw));
        }
    }

    pub fn reset(&mut self) {
        self.chain.iter_mut().for_each(|v| *v = 0.);
    }
}

/// # Description
/// the line buffers of all Nin input channels, modeled as one memory Nin times wider
#[derive(Debug)]
pub struct LineBufferArray {
    buffers: Vec<LineBuffer>,
    functional: bool,
    area: f64,
    access: Cost,
    energy: EnergyCounter,
}

impl LineBufferArray {
    pub fn new(geometry: &WindowGeometry, nin: usize, functional: bool, model: &TechModel) -> Self {
        let buffer = LineBuffer::new(geometry);
        let rows = geometry.kh - 1;
        let bits = nin * rows * buffer.sram_depth() * model.bit_width();
        let memory = model.memory(MemoryType::Ram, bits);
        let buffers = if functional {
            vec![buffer; nin]
        } else {
            Vec::new()
        };
        LineBufferArray {
            buffers,
            functional,
            area: memory.area,
            access: memory,
            energy: EnergyCounter::default(),
        }
    }

    /// shift one pixel of every channel, `None` shifts padding zeros
    pub fn shift(&mut self, pixel: Option<&[Payload]>) {
        // one read and one write of the centralized memory
        self.energy.record(self.access.dynamic_energy, 2);
        if !self.functional {
            return;
        }
        for (i, buffer) in self.buffers.iter_mut().enumerate() {
            let value = pixel.and_then(|p| p.get(i)).copied().unwrap_or(0.);
            buffer.shift(value);
        }
    }

    pub fn window_into(&self, channel: usize, out: &mut Vec<Payload>) {
        if let Some(buffer) = self.buffers.get(channel) {
            buffer.window_into(out);
        }
    }

    pub fn reset(&mut self) {
        self.buffers.iter_mut().for_each(LineBuffer::reset);
        self.energy.reset();
    }
}

impl Metered for LineBufferArray {
    fn kind(&self) -> StageKind {
        StageKind::LineBuffer
    }

    fn area(&self) -> f64 {
        self.area
    }

    fn static_power(&self) -> f64 {
        self.access.static_power
    }

    fn energy(&self) -> &EnergyCounter {
        &self.energy
    }
}

/// # Description
/// selects the windows of the `Pin` channels of one input group, channels past `Nin` read zero
#[derive(Debug)]
pub struct LineBufferMux {
    kk: usize,
    nin: usize,
    pin: usize,
    cost: Cost,
    energy: EnergyCounter,
}

impl LineBufferMux {
    pub fn new(geometry: &WindowGeometry, nin: usize, pin: usize, model: &TechModel) -> Self {
        let kk = geometry.kh * geometry.kw;
        let inputs = (nin + pin - 1) / pin;
        LineBufferMux {
            kk,
            nin,
            pin,
            cost: model.mux(inputs).times(pin * kk),
            energy: EnergyCounter::default(),
        }
    }

    /// # Description
    /// the `Pin * Kh * Kw` activations of `in_group`, channel major
    pub fn select(
        &mut self,
        line_buffers: &LineBufferArray,
        in_group: usize,
        out: &mut Vec<Payload>,
    ) {
        self.energy.record(self.cost.dynamic_energy, 1);
        out.clear();
        if !line_buffers.functional {
            return;
        }
        let start = in_group * self.pin;
        for ch in start..start + self.pin {
            if ch < self.nin {
                line_buffers.window_into(ch, out);
            } else {
                out.extend(std::iter::repeat(0.).take(self.kk));
            }
        }
    }

    pub fn reset(&mut self) {
        self.energy.reset();
    }
}

impl Metered for LineBufferMux {
    fn kind(&self) -> StageKind {
        StageKind::LineBufferMux
    }

    fn area(&self) -> f64 {
        self.cost.area
    }

    fn static_power(&self) -> f64 {
        self.cost.static_power
    }

    fn energy(&self) -> &EnergyCounter {
        &self.energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sliding_window() {
        // 4 wide map, 2x3 window
        let g = WindowGeometry::dense(3, 4, 2, 3);
        let mut buffer = LineBuffer::new(&g);
        assert_eq!(buffer.sram_depth(), 1);
        for v in 0..8 {
            buffer.shift(v as f64);
        }
        // the newest pixel 7 is row 1, col 3
        assert_eq!(buffer.window(), vec![1., 2., 3., 5., 6., 7.]);
        buffer.reset();
        assert!(buffer.window().iter().all(|v| *v == 0.));
    }

    #[test]
    fn test_mux_select() -> Result<(), Box<dyn std::error::Error>> {
        let model = TechModel::new(28, 16, 1.0)?;
        let g = WindowGeometry::dense(2, 2, 1, 2);
        let mut array = LineBufferArray::new(&g, 3, true, &model);
        array.shift(Some(&[1., 10., 100.]));
        array.shift(Some(&[2., 20., 200.]));
        let mut mux = LineBufferMux::new(&g, 3, 2, &model);
        let mut out = Vec::new();
        mux.select(&array, 0, &mut out);
        assert_eq!(out, vec![1., 2., 10., 20.]);
        // the second group is half empty
        mux.select(&array, 1, &mut out);
        assert_eq!(out, vec![100., 200., 0., 0.]);
        assert_eq!(mux.energy().ops, 2);
        assert_eq!(array.energy().ops, 4);
        Ok(())
    }

    #[test]
    fn test_area() -> Result<(), Box<dyn std::error::Error>> {
        let model = TechModel::new(28, 16, 1.0)?;
        // a single row kernel has no sram
        let flat = LineBufferArray::new(&WindowGeometry::dense(8, 8, 1, 3), 4, false, &model);
        assert_eq!(flat.area(), 0.);
        let g = WindowGeometry::dense(8, 8, 3, 3).with_pad(1, 1);
        let array = LineBufferArray::new(&g, 4, false, &model);
        let bits = 4 * 2 * (10 - 3) * 16;
        assert!((array.area() - model.memory(MemoryType::Ram, bits).area).abs() < 1e-9);
        Ok(())
    }
}
