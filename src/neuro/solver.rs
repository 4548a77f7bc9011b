use std::f64::consts::PI;

use tracing::debug;

use crate::error::Result;
use crate::neuro::cell::{Cell, SegmentRef};
use crate::neuro::context::SimulationContext;
use crate::neuro::schedule::{PlayHandle, Schedule, StateRef};

/// Fixed-step integrator driving a cell.
pub trait Integrator {
    fn context(&self) -> &SimulationContext;

    /// Rewinds the clock to 0, sets every segment to `v_init` and settles
    /// the gates at that voltage.
    fn initialize(&mut self, cell: &mut Cell, v_init: f64);

    /// Advances the cell by one step of `dt`.
    fn advance(&mut self, cell: &mut Cell);

    /// Binds `schedule` to `target`: sample `i` is written before step `i`
    /// is evaluated.
    fn play(&mut self, target: StateRef, schedule: Schedule) -> Result<PlayHandle>;

    fn play_remove(&mut self, handle: PlayHandle);

    /// Queues one event of `weight` for synapse `synapse`, `delay` ms from now.
    fn schedule_event(&mut self, synapse: usize, weight: f64, delay: f64);
}

// µm² to cm²
const AREA_CM2: f64 = 1e-8;
// µm to cm
const LENGTH_CM: f64 = 1e-4;
// S to µS
const TO_MICRO_SIEMENS: f64 = 1e6;
// µF to nF
const TO_NANO_FARAD: f64 = 1e3;

struct Play {
    handle: PlayHandle,
    target: StateRef,
    schedule: Schedule,
}

/// Per-segment exponential-Euler update with nearest-neighbour axial
/// coupling. Neighbour voltages are taken from the previous step.
pub struct ReducedSolver {
    ctx: SimulationContext,
    /// First flat index of every compartment.
    offsets: Vec<usize>,
    /// Membrane area per segment (µm²).
    area: Vec<f64>,
    /// nF
    capacitance: Vec<f64>,
    /// (a, b, µS) between flat segment indices.
    couplings: Vec<(usize, usize, f64)>,
    plays: Vec<Play>,
    next_play: u64,
    events: Vec<Vec<(usize, f64)>>,
    step: usize,
}

impl ReducedSolver {
    pub fn new(ctx: SimulationContext) -> Self {
        Self {
            ctx,
            offsets: Vec::new(),
            area: Vec::new(),
            capacitance: Vec::new(),
            couplings: Vec::new(),
            plays: Vec::new(),
            next_play: 0,
            events: vec![Vec::new(); 2],
            step: 0,
        }
    }

    fn flat(&self, at: SegmentRef) -> usize {
        self.offsets[at.compartment] + at.segment
    }

    fn build_geometry(&mut self, cell: &Cell) {
        let bio = &cell.biophysics;
        self.offsets.clear();
        self.area.clear();
        self.capacitance.clear();
        self.couplings.clear();

        // axial resistance (MΩ) of half a segment of compartment `c`
        let half_resistance = |c: usize| {
            let comp = &cell.compartments()[c];
            let seg_len = comp.length / comp.segments.len() as f64;
            let cross = PI * (comp.diam * LENGTH_CM).powi(2) / 4.0;
            bio.ra * (seg_len * LENGTH_CM / 2.0) / cross / TO_MICRO_SIEMENS
        };

        let mut next = 0;
        for comp in cell.compartments() {
            self.offsets.push(next);
            next += comp.segments.len();

            let seg_len = comp.length / comp.segments.len() as f64;
            for _ in &comp.segments {
                let area = PI * comp.diam * seg_len;
                self.area.push(area);
                self.capacitance.push(bio.cm * area * AREA_CM2 * TO_NANO_FARAD);
            }
        }

        for (c, comp) in cell.compartments().iter().enumerate() {
            let r_half = half_resistance(c);
            for s in 1..comp.segments.len() {
                let a = self.offsets[c] + s - 1;
                self.couplings.push((a, a + 1, 1.0 / (2.0 * r_half)));
            }

            if let Some((parent, parent_x)) = comp.parent {
                let upstream = self.flat(cell.locate(parent, parent_x));
                let g = 1.0 / (r_half + half_resistance(parent));
                self.couplings.push((upstream, self.offsets[c], g));
            }
        }

        debug!(
            segments = self.area.len(),
            couplings = self.couplings.len(),
            "built solver geometry"
        );
    }

    fn write_plays(&self, cell: &mut Cell) {
        let step = self.ctx.step_index();
        for play in &self.plays {
            if let Some(value) = play.schedule.get(step) {
                play.target.write(cell, value);
            }
        }
    }

    fn grow_ring(&mut self, len: usize) {
        let old = std::mem::take(&mut self.events);
        let old_len = old.len();
        let mut ring = vec![Vec::new(); len];
        for (slot, pending) in old.into_iter().enumerate() {
            // distance ahead of the current step is preserved
            let ahead = (slot + old_len - self.step % old_len) % old_len;
            ring[(self.step + ahead) % len] = pending;
        }
        self.events = ring;
    }

    fn deliver_events(&mut self, cell: &mut Cell) {
        let slot = self.step % self.events.len();
        for (synapse, weight) in std::mem::take(&mut self.events[slot]) {
            if let Some(syn) = cell.synapses.get_mut(synapse) {
                syn.receive(weight);
            }
        }
    }
}

impl Integrator for ReducedSolver {
    fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    fn initialize(&mut self, cell: &mut Cell, v_init: f64) {
        self.ctx.t = 0.0;
        self.step = 0;
        for slot in &mut self.events {
            slot.clear();
        }
        self.build_geometry(cell);
        self.write_plays(cell);

        for comp in cell.compartments_mut() {
            for seg in &mut comp.segments {
                seg.v = v_init;
                for mech in &mut seg.mechanisms {
                    mech.settle(v_init);
                }
            }
        }
    }

    fn advance(&mut self, cell: &mut Cell) {
        let dt = self.ctx.dt;
        self.write_plays(cell);
        self.deliver_events(cell);

        let (g_leak_density, e_leak) = (cell.biophysics.g_leak, cell.biophysics.e_leak);
        let n = self.area.len();
        let mut g_total = vec![0.0; n];
        let mut drive = vec![0.0; n];
        let mut v_old = vec![0.0; n];

        for (c, comp) in cell.compartments().iter().enumerate() {
            for (s, seg) in comp.segments.iter().enumerate() {
                let i = self.offsets[c] + s;
                let to_us = self.area[i] * AREA_CM2 * TO_MICRO_SIEMENS;
                v_old[i] = seg.v;

                let g_leak = g_leak_density * to_us;
                g_total[i] += g_leak;
                drive[i] += g_leak * e_leak;

                for mech in &seg.mechanisms {
                    let (g, e) = mech.open_conductance();
                    g_total[i] += g * to_us;
                    drive[i] += g * to_us * e;
                }

                for &p in &seg.point_processes {
                    if let Some(syn) = cell.synapses.get(p) {
                        let (g, ge) = syn.drive(seg.v);
                        g_total[i] += g;
                        drive[i] += ge;
                    }
                }
            }
        }

        for &(a, b, g) in &self.couplings {
            g_total[a] += g;
            drive[a] += g * v_old[b];
            g_total[b] += g;
            drive[b] += g * v_old[a];
        }

        for (c, comp) in cell.compartments_mut().iter_mut().enumerate() {
            for (s, seg) in comp.segments.iter_mut().enumerate() {
                let i = self.offsets[c] + s;
                if g_total[i] > 0.0 {
                    let v_inf = drive[i] / g_total[i];
                    let tau = self.capacitance[i] / g_total[i];
                    seg.v = v_inf + (v_old[i] - v_inf) * (-dt / tau).exp();
                }

                for mech in &mut seg.mechanisms {
                    mech.relax(seg.v, dt);
                }
            }
        }

        for syn in &mut cell.synapses {
            syn.decay(dt);
        }

        self.step += 1;
        self.ctx.t = self.step as f64 * dt;
    }

    fn play(&mut self, target: StateRef, schedule: Schedule) -> Result<PlayHandle> {
        schedule.ensure_len(&self.ctx)?;
        let handle = PlayHandle(self.next_play);
        self.next_play += 1;
        self.plays.push(Play {
            handle,
            target,
            schedule,
        });
        Ok(handle)
    }

    fn play_remove(&mut self, handle: PlayHandle) {
        self.plays.retain(|play| play.handle != handle);
    }

    fn schedule_event(&mut self, synapse: usize, weight: f64, delay: f64) {
        let ticks = ((delay / self.ctx.dt) - 1e-9).ceil().max(0.0) as usize;
        if ticks + 1 >= self.events.len() {
            self.grow_ring(ticks + 2);
        }
        let slot = (self.step + ticks) % self.events.len();
        self.events[slot].push((synapse, weight));
    }
}
