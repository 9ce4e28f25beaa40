/// Broker connection settings shared by the API node and the workers.
#[derive(Debug, Clone)]
pub struct MqConfig {
    pub url: String,
    pub pool_size: u8,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".into(),
            pool_size: 5,
        }
    }
}
