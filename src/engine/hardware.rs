// CPU capability probe for automatic quality scaling

use serde::Serialize;
use sysinfo::System;

/// Weighted score of the hardware the reference ladder was tuned on
/// (x86_64, 4 logical cores at 2 GHz)
pub const REFERENCE_SCORE: f64 = 8.0;

pub const MAX_QUALITY_FACTOR: f64 = 3.0;

/// Clock assumed when the platform does not report one
const FALLBACK_MHZ: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuProfile {
    pub arch: String,
    pub logical_cores: usize,
    pub mhz: u64,
    pub quality_factor: f64,
}

impl CpuProfile {
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_cpu();

        let logical_cores = system.cpus().len().max(1);
        let mhz = system
            .cpus()
            .iter()
            .map(|cpu| cpu.frequency())
            .max()
            .unwrap_or(0);
        let arch = std::env::consts::ARCH.to_string();
        let quality_factor = quality_factor_for(&arch, logical_cores, mhz);

        tracing::debug!(%arch, logical_cores, mhz, quality_factor, "cpu profile");

        Self {
            arch,
            logical_cores,
            mhz,
            quality_factor,
        }
    }
}

/// Per-core throughput relative to x86_64 at the same clock
fn arch_weight(arch: &str) -> f64 {
    match arch {
        "x86_64" => 1.0,
        "aarch64" => 0.6,
        "x86" => 0.5,
        a if a.starts_with("arm") => 0.35,
        _ => 0.5,
    }
}

/// 1.0 on reference-class hardware, growing (up to 3.0) as the machine gets slower
pub fn quality_factor_for(arch: &str, logical_cores: usize, mhz: u64) -> f64 {
    let mhz = if mhz == 0 { FALLBACK_MHZ } else { mhz };
    let score = arch_weight(arch) * logical_cores.max(1) as f64 * (mhz as f64 / 1000.0);
    (REFERENCE_SCORE / score).clamp(1.0, MAX_QUALITY_FACTOR)
}

pub fn cpu_quality_factor() -> f64 {
    CpuProfile::detect().quality_factor
}
