// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device selection for model placement.

use candle_core::Device;

use crate::error::Result;

/// Select the device models are placed on.
///
/// With `force_cpu` the CPU is always used. Otherwise CUDA GPU 0 is used
/// when available, with CPU as the fallback.
///
/// # Errors
///
/// Returns [`AttribError::Model`](crate::AttribError::Model) on device
/// detection failure.
pub fn select_device(force_cpu: bool) -> Result<Device> {
    if force_cpu {
        return Ok(Device::Cpu);
    }
    let device = Device::cuda_if_available(0)?;
    tracing::debug!(cuda = device.is_cuda(), "selected device");
    Ok(device)
}
