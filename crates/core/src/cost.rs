//! Compute-cost estimation.
//!
//! [`estimate`] is a deterministic, side-effect-free function over job
//! parameters. The router calls it on every admission check and on every
//! dispatch tie-break, so it must stay cheap: no allocation, no I/O.

use crate::job::{DrawParams, JobKind};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Step count that costs 1.0 at the baseline resolution.
pub const BASELINE_STEPS: f64 = 20.0;

/// Pixel-area scaling is relative to a 512x512 canvas.
pub const BASELINE_AREA: f64 = (512 * 512) as f64;

/// Exponent applied to the relative pixel area. Memory pressure and
/// attention cost grow faster than linearly with resolution.
pub const AREA_EXPONENT: f64 = 1.25;

/// Cost multiplier for a control-image conditioning pass.
pub const CONTROL_NET_FACTOR: f64 = 1.33;

/// Lower bound on the init-image denoising strength factor.
pub const MIN_STRENGTH_FACTOR: f64 = 0.2;

/// Minimum cost of any synthesis job.
pub const SYNTHESIS_COST_FLOOR: f64 = 1.0;

/// Fixed nominal cost of an upscale job.
pub const UPSCALE_COST: f64 = 4.0;

/// Sampling algorithms known to run at roughly half speed.
pub const SLOW_SAMPLERS: [&str; 9] = [
    "Heun",
    "DPM2",
    "DPM2 a",
    "DPM++ 2S a",
    "DPM2 Karras",
    "DPM2 a Karras",
    "DPM++ 2S a Karras",
    "DPM++ SDE",
    "DPM++ SDE Karras",
];

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Estimate the compute cost of a job in abstract units.
///
/// A 512x512, 20-step, fast-sampler, batch-1 synthesis job costs exactly
/// 1.0. Cost is monotonic in step count, resolution, and batch size.
pub fn estimate(kind: &JobKind) -> f64 {
    match kind {
        JobKind::Draw(params) => estimate_draw(params),
        JobKind::Upscale(_) => UPSCALE_COST,
        // Combined mode fans out across every caption model.
        JobKind::Identify(params) => params.models.len().max(1) as f64,
    }
}

fn estimate_draw(params: &DrawParams) -> f64 {
    let mut cost = params.steps as f64 / BASELINE_STEPS;
    if SLOW_SAMPLERS.contains(&params.sampler.as_str()) {
        cost *= 2.0;
    }

    // The high-res fix runs a second pass worth roughly another base pass.
    let highres_add = if params.highres_fix { cost } else { 0.0 };

    let area = params.width as f64 * params.height as f64;
    cost *= (area / BASELINE_AREA).max(1.0).powf(AREA_EXPONENT);

    if params.init_image || params.highres_fix {
        cost *= params.strength.max(MIN_STRENGTH_FACTOR);
    }
    if params.control_net {
        cost *= CONTROL_NET_FACTOR;
    }

    cost += highres_add;
    cost = cost.max(SYNTHESIS_COST_FLOOR);
    cost * params.batch as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
