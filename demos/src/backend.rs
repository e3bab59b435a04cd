//! Backend selection driven by cargo features.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        use burn::backend::cuda::{Cuda, CudaDevice};

        /// Selected backend type
        pub type SelectedBackend = Cuda;
        /// Selected device type
        pub type SelectedDevice = CudaDevice;

        /// One CUDA device per ordinal.
        pub fn create_devices(indices: &[usize]) -> Vec<SelectedDevice> {
            indices.iter().map(|&i| CudaDevice::new(i)).collect()
        }

        pub const fn get_backend_name() -> &'static str {
            "CUDA (NVIDIA GPU)"
        }
    } else if #[cfg(feature = "wgpu")] {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};

        /// Selected backend type
        pub type SelectedBackend = Wgpu;
        /// Selected device type
        pub type SelectedDevice = WgpuDevice;

        /// One discrete GPU per ordinal.
        pub fn create_devices(indices: &[usize]) -> Vec<SelectedDevice> {
            indices.iter().map(|&i| WgpuDevice::DiscreteGpu(i)).collect()
        }

        pub const fn get_backend_name() -> &'static str {
            "WGPU (GPU)"
        }
    } else {
        use burn::backend::ndarray::{NdArray, NdArrayDevice};

        /// Selected backend type
        pub type SelectedBackend = NdArray;
        /// Selected device type
        pub type SelectedDevice = NdArrayDevice;

        /// The CPU has a single device; each index adds one more data-parallel replica.
        pub fn create_devices(indices: &[usize]) -> Vec<SelectedDevice> {
            vec![NdArrayDevice::Cpu; indices.len()]
        }

        pub const fn get_backend_name() -> &'static str {
            "NdArray (CPU)"
        }
    }
}

/// Backend used for training.
pub type TrainingBackend = burn::backend::Autodiff<SelectedBackend>;

/// Parses a device list such as `0,1,2,3` or `0-3`.
pub fn parse_device_indices(devices: &str) -> Result<Vec<usize>, String> {
    let mut indices = Vec::new();
    for part in devices.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start.trim().parse().map_err(|e| format!("{part}: {e}"))?;
                let end: usize = end.trim().parse().map_err(|e| format!("{part}: {e}"))?;
                if end < start {
                    return Err(format!("{part}: empty range"));
                }
                indices.extend(start..=end);
            }
            None => indices.push(part.parse().map_err(|e| format!("{part}: {e}"))?),
        }
    }

    if indices.is_empty() {
        return Err("no device given".to_string());
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lists_and_ranges() {
        assert_eq!(parse_device_indices("0"), Ok(vec![0]));
        assert_eq!(parse_device_indices("0,2"), Ok(vec![0, 2]));
        assert_eq!(parse_device_indices("0-3"), Ok(vec![0, 1, 2, 3]));
        assert_eq!(parse_device_indices("1, 4-5"), Ok(vec![1, 4, 5]));
    }

    #[test]
    fn rejects_malformed_lists() {
        assert!(parse_device_indices("").is_err());
        assert!(parse_device_indices("a").is_err());
        assert!(parse_device_indices("3-1").is_err());
    }

    #[test]
    fn one_device_per_index() {
        assert_eq!(create_devices(&[0, 1]).len(), 2);
    }
}
