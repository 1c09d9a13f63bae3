//! Compute routing: picks where a heavy action runs.
//!
//! A pure decision function over documented threshold constants. No I/O,
//! so every branch is table-testable. Ties break by ascending estimated
//! cost, then local before remote (data movement).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Element count above which the GPU beats the CPU.
pub const GPU_ELEMENT_THRESHOLD: u64 = 50_000;

/// Element count above which the CPU should take the SIMD/parallel path.
pub const SIMD_ELEMENT_THRESHOLD: u64 = 1_000;

/// Estimated duration beyond which the plan must support checkpointing.
pub const CHECKPOINT_DURATION: Duration = Duration::from_secs(10 * 60);

/// Estimated duration beyond which remote offload is preferred.
pub const OFFLOAD_DURATION: Duration = Duration::from_secs(30 * 60);

/// Largest workload considered worth shipping to the client.
pub const CLIENT_SIDE_ELEMENT_LIMIT: u64 = 10_000;

/// Where a heavy action runs. Attached to the exchange for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComputeTarget {
    LocalCpu,
    LocalGpu,
    NeuralAccelerator,
    RemoteGpu,
    ClientSide,
}

impl ComputeTarget {
    /// Whether the target is on the local machine.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            ComputeTarget::LocalCpu | ComputeTarget::LocalGpu | ComputeTarget::NeuralAccelerator
        )
    }
}

impl std::fmt::Display for ComputeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeTarget::LocalCpu => write!(f, "local-cpu"),
            ComputeTarget::LocalGpu => write!(f, "local-gpu"),
            ComputeTarget::NeuralAccelerator => write!(f, "neural-accelerator"),
            ComputeTarget::RemoteGpu => write!(f, "remote-gpu"),
            ComputeTarget::ClientSide => write!(f, "client-side"),
        }
    }
}

/// CPU execution path for workloads that stay on the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuPath {
    Scalar,
    Simd,
}

/// Workload estimate supplied with an action that needs heavy computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionProfile {
    /// Estimated element count processed.
    pub element_count: u64,
    /// Estimated wall-clock duration.
    pub est_duration: Duration,
    /// Whether client-side execution is acceptable for this action.
    pub client_ok: bool,
    /// Whether the workload is neural-network inference.
    pub inference: bool,
}

impl ActionProfile {
    /// Profile with the given size and duration, local-only, non-inference.
    pub fn sized(element_count: u64, est_duration: Duration) -> Self {
        Self {
            element_count,
            est_duration,
            client_ok: false,
            inference: false,
        }
    }
}

/// Full routing plan: target plus execution hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePlan {
    /// Selected compute target.
    pub target: ComputeTarget,
    /// Scalar or SIMD when the target is the CPU.
    pub cpu_path: CpuPath,
    /// Whether the action must support checkpoint/resume.
    pub checkpoint: bool,
}

/// Select a compute target for the given workload profile.
///
/// Pure and idempotent: identical profiles always yield identical targets.
pub fn route(profile: &ActionProfile) -> ComputeTarget {
    plan(profile).target
}

/// Compute the full routing plan for the given workload profile.
///
/// Rules, highest precedence first. The ladder encodes the cost ordering
/// (cheapest candidate that satisfies the size/duration constraints wins)
/// with local targets ahead of remote ones at equal cost:
/// 1. past `OFFLOAD_DURATION` (strictly) the work leaves the machine;
/// 2. past `GPU_ELEMENT_THRESHOLD` the GPU beats the CPU;
/// 3. a client-eligible workload within `CLIENT_SIDE_ELEMENT_LIMIT` ships
///    to the client, which costs the pipeline host nothing;
/// 4. non-trivial inference runs on the neural accelerator;
/// 5. everything else stays on the CPU, SIMD path past
///    `SIMD_ELEMENT_THRESHOLD`.
pub fn plan(profile: &ActionProfile) -> RoutePlan {
    let checkpoint = profile.est_duration > CHECKPOINT_DURATION;

    let cpu_path = if profile.element_count > SIMD_ELEMENT_THRESHOLD {
        CpuPath::Simd
    } else {
        CpuPath::Scalar
    };

    let target = if profile.est_duration > OFFLOAD_DURATION {
        ComputeTarget::RemoteGpu
    } else if profile.element_count > GPU_ELEMENT_THRESHOLD {
        ComputeTarget::LocalGpu
    } else if profile.client_ok && profile.element_count <= CLIENT_SIDE_ELEMENT_LIMIT {
        ComputeTarget::ClientSide
    } else if profile.inference && profile.element_count > SIMD_ELEMENT_THRESHOLD {
        ComputeTarget::NeuralAccelerator
    } else {
        ComputeTarget::LocalCpu
    };

    RoutePlan {
        target,
        cpu_path,
        checkpoint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[test]
    fn test_route_is_idempotent() {
        let profile = ActionProfile::sized(75_000, minutes(2));
        let first = route(&profile);
        for _ in 0..10 {
            assert_eq!(route(&profile), first);
        }
    }

    #[test]
    fn test_threshold_table() {
        // (elements, minutes, client_ok, inference) -> expected target
        let cases: &[(u64, u64, bool, bool, ComputeTarget)] = &[
            (100, 1, false, false, ComputeTarget::LocalCpu),
            (10_000, 1, false, false, ComputeTarget::LocalCpu),
            (100_000, 1, false, false, ComputeTarget::LocalGpu),
            (100, 45, false, false, ComputeTarget::RemoteGpu),
            (100_000, 45, false, false, ComputeTarget::RemoteGpu),
            (500, 1, false, true, ComputeTarget::LocalCpu),
            (5_000, 1, false, true, ComputeTarget::NeuralAccelerator),
            (100_000, 1, false, true, ComputeTarget::LocalGpu),
            (5_000, 1, true, false, ComputeTarget::ClientSide),
            (20_000, 1, true, false, ComputeTarget::LocalCpu),
        ];

        for &(elements, mins, client_ok, inference, expected) in cases {
            let profile = ActionProfile {
                element_count: elements,
                est_duration: minutes(mins),
                client_ok,
                inference,
            };
            assert_eq!(
                route(&profile),
                expected,
                "elements={} minutes={} client_ok={} inference={}",
                elements,
                mins,
                client_ok,
                inference
            );
        }
    }

    #[test]
    fn test_gpu_boundary_exact() {
        // 50,000 elements stay on the CPU; 50,001 cross to the GPU.
        let at = ActionProfile::sized(GPU_ELEMENT_THRESHOLD, minutes(1));
        assert_eq!(route(&at), ComputeTarget::LocalCpu);

        let over = ActionProfile::sized(GPU_ELEMENT_THRESHOLD + 1, minutes(1));
        assert_eq!(route(&over), ComputeTarget::LocalGpu);
    }

    #[test]
    fn test_offload_boundary_exact() {
        // Exactly thirty minutes stays local; one second past offloads.
        let at = ActionProfile::sized(100_000, minutes(30));
        assert!(route(&at).is_local());

        let over = ActionProfile {
            est_duration: minutes(30) + Duration::from_secs(1),
            ..at
        };
        assert_eq!(route(&over), ComputeTarget::RemoteGpu);
    }

    #[test]
    fn test_simd_path_selection() {
        let scalar = plan(&ActionProfile::sized(SIMD_ELEMENT_THRESHOLD, minutes(1)));
        assert_eq!(scalar.cpu_path, CpuPath::Scalar);

        let simd = plan(&ActionProfile::sized(SIMD_ELEMENT_THRESHOLD + 1, minutes(1)));
        assert_eq!(simd.cpu_path, CpuPath::Simd);
    }

    #[test]
    fn test_checkpoint_required_past_ten_minutes() {
        let short = plan(&ActionProfile::sized(100, minutes(10)));
        assert!(!short.checkpoint);

        let long = plan(&ActionProfile::sized(
            100,
            minutes(10) + Duration::from_secs(1),
        ));
        assert!(long.checkpoint);
    }

    #[test]
    fn test_client_side_only_within_ship_limit() {
        let small = ActionProfile {
            element_count: CLIENT_SIDE_ELEMENT_LIMIT,
            est_duration: minutes(1),
            client_ok: true,
            inference: false,
        };
        assert_eq!(route(&small), ComputeTarget::ClientSide);

        // Past the ship limit, data movement disqualifies the client.
        let large = ActionProfile {
            element_count: CLIENT_SIDE_ELEMENT_LIMIT + 1,
            ..small
        };
        assert_eq!(route(&large), ComputeTarget::LocalCpu);
    }

    #[test]
    fn test_trivial_inference_stays_on_cpu() {
        // Below the SIMD threshold the accelerator is not worth the setup.
        let profile = ActionProfile {
            element_count: 100,
            est_duration: minutes(1),
            client_ok: false,
            inference: true,
        };
        assert_eq!(route(&profile), ComputeTarget::LocalCpu);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ComputeTarget::LocalGpu.to_string(), "local-gpu");
        assert_eq!(ComputeTarget::RemoteGpu.to_string(), "remote-gpu");
        assert_eq!(
            ComputeTarget::NeuralAccelerator.to_string(),
            "neural-accelerator"
        );
    }
}
