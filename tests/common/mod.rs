#![allow(dead_code)]

use qconv::{AccelError, AccelPort, Conv2dGeometry, RunConfig, Transfer, requantize};
use rand::{Rng, SeedableRng, rngs::StdRng};

pub const LINE_WORDS: usize = 3072;

/// Direct seven-loop convolution with wrapping i32 accumulation.
pub fn reference_conv(
    x: &[i16],
    w: &[i8],
    bias: Option<&[i32]>,
    multiplier: u32,
    g: &Conv2dGeometry,
) -> Vec<i16> {
    let (oh, ow) = (g.out_h(), g.out_w());
    let shape = g.weight_shape();
    let in_len = g.in_channels * g.in_h * g.in_w;
    let mut y = vec![0i16; g.output_len()];
    let mut i = 0;
    for n in 0..g.batch {
        let xn = &x[n * in_len..(n + 1) * in_len];
        for oc in 0..g.out_channels {
            for r in 0..oh {
                for c in 0..ow {
                    let mut acc = bias.map_or(0, |b| b[oc]);
                    for ic in 0..g.in_channels {
                        for ky in 0..g.kernel_h {
                            for kx in 0..g.kernel_w {
                                let ih = (r * g.stride_h + ky) as isize - g.pad_h as isize;
                                let iw = (c * g.stride_w + kx) as isize - g.pad_w as isize;
                                if ih < 0 || iw < 0 || ih >= g.in_h as isize || iw >= g.in_w as isize {
                                    continue;
                                }
                                let xv = xn[(ic * g.in_h + ih as usize) * g.in_w + iw as usize];
                                let wv = w[shape.index(oc, ic, ky, kx)];
                                acc = acc.wrapping_add(xv as i32 * wv as i32);
                            }
                        }
                    }
                    y[i] = requantize(acc, multiplier);
                    i += 1;
                }
            }
        }
    }
    y
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_weights(rng: &mut StdRng, len: usize) -> Vec<i8> {
    (0..len).map(|_| rng.gen_range(-127..=127)).collect()
}

/// Activations within `[-range, range]` in Q6.10 units.
pub fn random_activations(rng: &mut StdRng, len: usize, range: i16) -> Vec<i16> {
    (0..len).map(|_| rng.gen_range(-range..=range)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Configure(RunConfig),
    StartLoad(bool),
    Send(Transfer, usize),
    Receive(usize),
}

/// Software model of the 32-lane PE array on the far side of the DMA.
///
/// Bias and weights latch only while start-load is asserted. Each activation
/// transfer produces one output row that the next receive returns.
#[derive(Default)]
pub struct SimPort {
    pub ready: bool,
    pub events: Vec<Event>,
    /// Fails the n-th send of this kind (0-based) with a submission error.
    pub fail_send: Option<(Transfer, usize)>,
    /// Fails the n-th receive (0-based) with a timeout.
    pub fail_receive: Option<usize>,
    run: RunConfig,
    start_load: bool,
    bias: [i32; 32],
    weights: Vec<u32>,
    pending: Vec<u32>,
    sends: Vec<Transfer>,
    receives: usize,
}

impl SimPort {
    pub fn opened() -> Self {
        Self {
            ready: true,
            ..Self::default()
        }
    }

    pub fn failing_send(kind: Transfer, nth: usize) -> Self {
        Self {
            fail_send: Some((kind, nth)),
            ..Self::opened()
        }
    }

    pub fn failing_receive(nth: usize) -> Self {
        Self {
            fail_receive: Some(nth),
            ..Self::opened()
        }
    }

    pub fn count(&self, kind: Transfer) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Send(k, _) if *k == kind))
            .count()
    }

    fn compute_row(&mut self, lines: &[u32]) {
        let RunConfig {
            kernel_size: k,
            target_ic: ic,
            img_width: padded_w,
            stride,
            multiplier,
            ..
        } = self.run;
        let (k, ic, padded_w, stride) = (k as usize, ic as usize, padded_w as usize, stride as usize);
        let pairs = ic / 2;
        let ow = (padded_w - k) / stride + 1;
        self.pending = vec![0u32; ow * 16];
        for ox in 0..ow {
            for pe in 0..32 {
                let mut acc = self.bias[pe];
                for c in 0..ic {
                    for ky in 0..k {
                        let line = &lines[ky * LINE_WORDS..(ky + 1) * LINE_WORDS];
                        for kx in 0..k {
                            let tap = (c * k + ky) * k + kx;
                            let word = self.weights[tap * 8 + pe / 4];
                            let wv = (word >> (8 * (pe % 4))) as u8 as i8 as i32;
                            let act = line[(ox * stride + kx) * pairs + c / 2];
                            let xv = (if c % 2 == 1 { act >> 16 } else { act & 0xFFFF }) as u16 as i16;
                            acc = acc.wrapping_add(wv * xv as i32);
                        }
                    }
                }
                let v = requantize(acc, multiplier) as u16 as u32;
                self.pending[ox * 16 + pe / 2] |= v << (16 * (pe % 2));
            }
        }
    }
}

impl AccelPort for SimPort {
    const SUPPORTED: bool = true;

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn open(&mut self) -> Result<(), AccelError> {
        self.ready = true;
        Ok(())
    }

    fn close(&mut self) {
        self.ready = false;
    }

    fn configure(&mut self, run: &RunConfig) {
        self.run = *run;
        self.events.push(Event::Configure(*run));
    }

    fn set_start_load(&mut self, on: bool) {
        self.start_load = on;
        self.events.push(Event::StartLoad(on));
    }

    fn send(&mut self, kind: Transfer, words: &[u32]) -> Result<(), AccelError> {
        let nth = self.sends.iter().filter(|&&k| k == kind).count();
        self.sends.push(kind);
        if self.fail_send == Some((kind, nth)) || words.is_empty() {
            return Err(AccelError::Submit(kind));
        }
        self.events.push(Event::Send(kind, words.len()));
        match kind {
            Transfer::Bias if self.start_load => {
                for (b, &w) in self.bias.iter_mut().zip(words) {
                    *b = w as i32;
                }
            }
            Transfer::Weights if self.start_load => self.weights = words.to_vec(),
            Transfer::Activation => self.compute_row(words),
            _ => {}
        }
        Ok(())
    }

    fn receive(&mut self, out: &mut [u32]) -> Result<(), AccelError> {
        let nth = self.receives;
        self.receives += 1;
        if self.fail_receive == Some(nth) {
            return Err(AccelError::RxTimeout(1));
        }
        self.events.push(Event::Receive(out.len()));
        let n = out.len().min(self.pending.len());
        out[..n].copy_from_slice(&self.pending[..n]);
        Ok(())
    }
}
