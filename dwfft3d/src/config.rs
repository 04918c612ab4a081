use log::warn;
use std::env;

/// Tunables of the transform engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FFTConfig {
    /// size of the worker pool, `None` lets rayon decide
    pub num_threads: Option<usize>,

    /// fraction of the local z-planes handed to the accelerator
    pub gpu_workload: f64,

    /// bytes available on the accelerator, `None` is unlimited
    pub device_memory: Option<usize>,
}

pub const DEFAULT_GPU_WORKLOAD: f64 = 0.8;

impl Default for FFTConfig {
    fn default() -> Self {
        FFTConfig {
            num_threads: None,
            gpu_workload: DEFAULT_GPU_WORKLOAD,
            device_memory: None,
        }
    }
}

impl FFTConfig {
    /// Defaults overridden by `DWFFT3D_NUM_THREADS`, `DWFFT3D_GPU_WORKLOAD`
    /// and `DWFFT3D_DEVICE_MEMORY`.
    pub fn from_env() -> FFTConfig {
        let mut config = FFTConfig::default();

        if let Some(n) = read_var::<usize>("DWFFT3D_NUM_THREADS") {
            if n > 0 {
                config.num_threads = Some(n);
            } else {
                warn!("DWFFT3D_NUM_THREADS = 0 ignored");
            }
        }

        if let Some(f) = read_var::<f64>("DWFFT3D_GPU_WORKLOAD") {
            config = config.with_gpu_workload(f);
        }

        if let Some(bytes) = read_var::<usize>("DWFFT3D_DEVICE_MEMORY") {
            config.device_memory = Some(bytes);
        }

        config
    }

    /// Workload fraction clamped to `[0, 1]`.
    pub fn with_gpu_workload(mut self, gpu_workload: f64) -> FFTConfig {
        if gpu_workload.is_nan() {
            warn!("gpu workload NaN ignored, keeping {}", self.gpu_workload);
            return self;
        }

        if !(0.0..=1.0).contains(&gpu_workload) {
            warn!("gpu workload {} clamped to [0, 1]", gpu_workload);
        }

        self.gpu_workload = gpu_workload.clamp(0.0, 1.0);

        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> FFTConfig {
        self.num_threads = Some(num_threads);

        self
    }

    pub fn with_device_memory(mut self, bytes: usize) -> FFTConfig {
        self.device_memory = Some(bytes);

        self
    }

    /// Number of planes out of `local_size_z` processed on the accelerator.
    pub fn num_device_planes(&self, local_size_z: usize) -> usize {
        (self.gpu_workload * local_size_z as f64 + 1e-12) as usize
    }
}

fn read_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;

    match value.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("invalid value '{}' for {} ignored", value, name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_clamp() {
        let config = FFTConfig::default().with_gpu_workload(1.7);
        assert_eq!(config.gpu_workload, 1.0);

        let config = FFTConfig::default().with_gpu_workload(-0.2);
        assert_eq!(config.gpu_workload, 0.0);

        let config = FFTConfig::default().with_gpu_workload(f64::NAN);
        assert_eq!(config.gpu_workload, DEFAULT_GPU_WORKLOAD);
    }

    #[test]
    fn test_num_device_planes() {
        let config = FFTConfig::default();

        assert_eq!(config.num_device_planes(10), 8);
        assert_eq!(config.num_device_planes(1), 0);

        let config = config.with_gpu_workload(0.3);
        assert_eq!(config.num_device_planes(10), 3);

        let config = config.with_gpu_workload(1.0);
        assert_eq!(config.num_device_planes(7), 7);
    }
}
