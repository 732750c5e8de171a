use rand::Rng;

/// 一次负载采样
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    pub cpu_usage: f64,
    pub ram_usage: f64,
    /// GB
    pub total_ram: f64,
}

pub trait LoadSampler: Send + Sync {
    fn sample(&self) -> LoadSample;
}

/// 随机波动的负载
#[derive(Debug, Clone)]
pub struct RandomLoad {
    total_ram: f64,
}

impl RandomLoad {
    pub fn new(total_ram: f64) -> Self {
        Self { total_ram }
    }
}

impl Default for RandomLoad {
    fn default() -> Self {
        Self::new(32.0)
    }
}

impl LoadSampler for RandomLoad {
    fn sample(&self) -> LoadSample {
        let mut rng = rand::rng();
        LoadSample {
            cpu_usage: rng.random_range(0.05..0.95),
            ram_usage: rng.random_range(0.1..0.8),
            total_ram: self.total_ram,
        }
    }
}

/// 固定负载
#[derive(Debug, Clone, Copy)]
pub struct FixedLoad(pub LoadSample);

impl LoadSampler for FixedLoad {
    fn sample(&self) -> LoadSample {
        self.0
    }
}
