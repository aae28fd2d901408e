use candle_core::{DType, Device, DeviceLocation};

/// Pick the floating point type for a device.
///
/// Accelerators run in BF16 when supported and fall back to F16; the CPU always uses F32.
pub fn select_dtype(accelerated: bool, bf16_supported: bool) -> DType {
    match (accelerated, bf16_supported) {
        (false, _) => DType::F32,
        (true, true) => DType::BF16,
        (true, false) => DType::F16,
    }
}

/// Select the device to run a model on, together with its dtype.
///
/// NOTE: to run on an accelerator, build with `--features cuda` or `--features metal`.
///
/// # Arguments
///
/// * `force_cpu` - Skip accelerator detection and run on the CPU.
pub fn select_device(force_cpu: bool) -> (Device, DType) {
    if force_cpu {
        return (Device::Cpu, DType::F32);
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                let dtype = select_dtype(true, device.supports_bf16());
                return (device, dtype);
            }
            Err(e) => log::warn!("CUDA not available, defaulting to CPU: {e}"),
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                let dtype = select_dtype(true, device.supports_bf16());
                return (device, dtype);
            }
            Err(e) => log::warn!("Metal not available, defaulting to CPU: {e}"),
        }
    }

    (Device::Cpu, select_dtype(false, false))
}

/// Short label of a device, e.g. `cpu` or `cuda:0`.
pub fn describe(device: &Device) -> String {
    match device.location() {
        DeviceLocation::Cpu => "cpu".to_string(),
        DeviceLocation::Cuda { gpu_id } => format!("cuda:{gpu_id}"),
        DeviceLocation::Metal { gpu_id } => format!("metal:{gpu_id}"),
    }
}

/// Names of the accelerator backends compiled into this build.
pub fn compiled_backends() -> Vec<&'static str> {
    let mut backends = vec!["cpu"];
    if cfg!(feature = "cuda") {
        backends.push("cuda");
    }
    if cfg!(feature = "metal") {
        backends.push("metal");
    }
    backends
}

/// Log which backends are compiled in and which device would be used.
pub fn log_diagnostics(force_cpu: bool) {
    log::info!("==== Device diagnostics ====");
    log::info!("compiled backends: {}", compiled_backends().join(", "));
    log::info!(
        "cuda available: {}",
        candle_core::utils::cuda_is_available()
    );
    log::info!(
        "metal available: {}",
        candle_core::utils::metal_is_available()
    );
    let (device, dtype) = select_device(force_cpu);
    log::info!("selected device: {} ({dtype:?})", describe(&device));
    log::info!("============================");
}
