use log::warn;

/// Maximum number of threads a runtime creates by default.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Stack size given to each thread by default.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Smallest stack a thread can get. The preemption signal handler runs on
/// the interrupted thread's stack, so anything below this is raised.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Size of the thread table. Tids are never reused, so this bounds the
    /// number of threads created over the lifetime of a runtime.
    pub capacity: usize,
    /// Bytes of stack allocated for every thread.
    pub stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            capacity: DEFAULT_CAPACITY,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl Config {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        if stack_size < MIN_STACK_SIZE {
            warn!(
                "stack size {} is below the minimum, using {} bytes",
                stack_size, MIN_STACK_SIZE
            );
            self.stack_size = MIN_STACK_SIZE;
        } else {
            self.stack_size = stack_size;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn small_stacks_are_raised() {
        let config = Config::default().with_stack_size(1024);
        assert_eq!(config.stack_size, MIN_STACK_SIZE);

        let config = Config::default().with_stack_size(128 * 1024);
        assert_eq!(config.stack_size, 128 * 1024);
    }
}
