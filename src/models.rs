//! # Description
//! - area and power models of the basic hardware blocks
//! - the metrics are regressions of synthesized netlists and memory compiler exports
//! - area in um2, static power in uW, dynamic energy in uW per active cycle at the configured clock
//!
//! # Components
//! - `TechModel`: the entry point, validated once for a technology node, bit width and clock
//! - `Cost`: the metric triple of one block instance
//! - `MemoryType`: the storage used by weight and buffer memories

use std::collections::HashMap;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::AccError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryType {
    Rom,
    Ram,
}

/// the metric triple of one hardware block
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Cost {
    pub area: f64,
    pub static_power: f64,
    pub dynamic_energy: f64,
}

impl Cost {
    /// the cost of `count` identical blocks
    pub fn times(self, count: usize) -> Cost {
        let count = count as f64;
        Cost {
            area: self.area * count,
            static_power: self.static_power * count,
            dynamic_energy: self.dynamic_energy * count,
        }
    }
}

/// quadratic regression over the bit width
#[derive(Debug, Clone, Copy)]
struct BitFit([f64; 3]);

impl BitFit {
    fn eval(&self, bit_width: f64) -> f64 {
        let [a, b, c] = self.0;
        (a + b * bit_width + c * bit_width * bit_width).max(0.)
    }
}

/// per bit regression over the number of ports: `b * (c0 + c1*n + c2*log2(n))`
#[derive(Debug, Clone, Copy)]
struct PortFit([f64; 3]);

impl PortFit {
    fn eval(&self, bit_width: f64, ports: usize) -> f64 {
        let [a, b, c] = self.0;
        let n = ports as f64;
        (bit_width * (a + b * n + c * n.log2())).max(0.)
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockFit<F> {
    area: F,
    static_power: F,
    dynamic: F,
}

#[derive(Debug)]
struct TechFits {
    adder: BlockFit<BitFit>,
    mult: BlockFit<BitFit>,
    comparator: BlockFit<BitFit>,
    mux: BlockFit<PortFit>,
    demux: BlockFit<PortFit>,
    /// linear area fit in kbit: (slope, offset)
    rom: (f64, f64),
    ram: (f64, f64),
}

lazy_static! {
    static ref TECH_FITS: HashMap<u32, TechFits> = {
        let mut fits = HashMap::new();
        fits.insert(
            28,
            TechFits {
                adder: BlockFit {
                    area: BitFit([-50.07, 37.86, 0.]),
                    static_power: BitFit([-0.012, 0.024, 0.]),
                    dynamic: BitFit([-14.62, 14.48, 0.]),
                },
                mult: BlockFit {
                    area: BitFit([-271.18, 146.95, 11.83]),
                    static_power: BitFit([-0.244, 0.141, 0.00519]),
                    dynamic: BitFit([-66.51, 27.11, 8.95]),
                },
                comparator: BlockFit {
                    area: BitFit([-10.45, 13.62, 0.]),
                    static_power: BitFit([-0.0026, 0.0087, 0.]),
                    dynamic: BitFit([-2.96, 4.33, 0.]),
                },
                mux: BlockFit {
                    area: PortFit([34.68, 5.25, 0.]),
                    static_power: PortFit([0.0588, 0.0025, 0.]),
                    dynamic: PortFit([21.84, 1.14, 0.]),
                },
                demux: BlockFit {
                    area: PortFit([-126.01, 3.26, 53.38]),
                    static_power: PortFit([-0.055, 0.000938, 0.0269]),
                    dynamic: PortFit([-39.99, 0.157, 18.927]),
                },
                rom: (62., 1578.),
                ram: (211., 3056.),
            },
        );
        fits
    };
}

/// # Description
/// the area and power models for one technology node, bit width and clock frequency
///
/// # Example
/// ```
/// use convnet_acc::models::TechModel;
/// let model = TechModel::new(28, 16, 1.0).unwrap();
/// assert!(model.multiplier().area > model.adder().area);
/// assert!(TechModel::new(45, 16, 1.0).is_err());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TechModel {
    node: u32,
    bit_width: usize,
    clk_freq: f64,
    fits: &'static TechFits,
}

impl TechModel {
    pub fn new(node: u32, bit_width: usize, clk_freq: f64) -> Result<Self, AccError> {
        let fits = TECH_FITS
            .get(&node)
            .ok_or(AccError::UndefinedTechNode(node))?;
        Ok(TechModel {
            node,
            bit_width,
            clk_freq,
            fits,
        })
    }

    pub fn node(&self) -> u32 {
        self.node
    }

    pub fn bit_width(&self) -> usize {
        self.bit_width
    }

    fn bit_cost(&self, fit: &BlockFit<BitFit>) -> Cost {
        if self.bit_width == 0 {
            return Cost::default();
        }
        let b = self.bit_width as f64;
        Cost {
            area: fit.area.eval(b),
            static_power: fit.static_power.eval(b),
            dynamic_energy: fit.dynamic.eval(b) * self.clk_freq,
        }
    }

    fn port_cost(&self, fit: &BlockFit<PortFit>, ports: usize) -> Cost {
        if self.bit_width == 0 || ports == 0 {
            return Cost::default();
        }
        let b = self.bit_width as f64;
        Cost {
            area: fit.area.eval(b, ports),
            static_power: fit.static_power.eval(b, ports),
            dynamic_energy: fit.dynamic.eval(b, ports) * self.clk_freq,
        }
    }

    pub fn adder(&self) -> Cost {
        self.bit_cost(&self.fits.adder)
    }

    pub fn multiplier(&self) -> Cost {
        self.bit_cost(&self.fits.mult)
    }

    pub fn comparator(&self) -> Cost {
        self.bit_cost(&self.fits.comparator)
    }

    /// a `bit_width` wide multiplexer selecting one of `inputs`
    pub fn mux(&self, inputs: usize) -> Cost {
        self.port_cost(&self.fits.mux, inputs)
    }

    /// a `bit_width` wide demultiplexer driving one of `outputs`
    pub fn demux(&self, outputs: usize) -> Cost {
        self.port_cost(&self.fits.demux, outputs)
    }

    /// a memory holding `bits` bits, only the area is modeled
    pub fn memory(&self, memory_type: MemoryType, bits: usize) -> Cost {
        let kbit = bits as f64 / 1024.;
        if kbit <= 0. {
            return Cost::default();
        }
        let (slope, offset) = match memory_type {
            MemoryType::Rom => self.fits.rom,
            MemoryType::Ram => self.fits.ram,
        };
        Cost {
            area: slope * kbit + offset,
            ..Cost::default()
        }
    }
}
