use std::time::Duration;

/// Tunables of one executer instance.
#[derive(Clone, Debug)]
pub struct ExecuterConfig {
    /// Scales the intake batch bound: the buffer flushes once it holds
    /// `round(inputs_count * input_rate)` entries.
    pub input_rate:        f64,
    /// How long a non-full intake batch may sit before it is flushed.
    pub input_flush:       Duration,
    /// Capacity of the prepared-updates channel feeding the update
    /// receiver; transaction servers block here once it is full.
    pub receiver_capacity: usize
}

impl Default for ExecuterConfig {
    fn default() -> Self {
        Self {
            input_rate:        1.0,
            input_flush:       Duration::from_millis(100),
            receiver_capacity: 32
        }
    }
}
