//! VM construction configuration.
//!
//! A small builder, in the same shape as the compiler's old
//! `CompilerConfig`: a `Default`-derived struct with `with_*` methods that
//! consume and return `self`, so callers chain `VmConfig::default()
//! .with_stack_capacity(4096)`.

use tacitus_core::ArenaConfig;

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub global_capacity: u32,
    pub stack_capacity: u32,
    pub rstack_capacity: u32,
}

impl Default for VmConfig {
    fn default() -> Self {
        let arena = ArenaConfig::default();
        VmConfig {
            global_capacity: arena.global_capacity,
            stack_capacity: arena.stack_capacity,
            rstack_capacity: arena.rstack_capacity,
        }
    }
}

impl VmConfig {
    pub fn with_global_capacity(mut self, cells: u32) -> Self {
        self.global_capacity = cells;
        self
    }

    pub fn with_stack_capacity(mut self, cells: u32) -> Self {
        self.stack_capacity = cells;
        self
    }

    pub fn with_rstack_capacity(mut self, cells: u32) -> Self {
        self.rstack_capacity = cells;
        self
    }

    pub fn arena_config(&self) -> ArenaConfig {
        ArenaConfig {
            global_capacity: self.global_capacity,
            stack_capacity: self.stack_capacity,
            rstack_capacity: self.rstack_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_arena_default() {
        let cfg = VmConfig::default();
        let arena = ArenaConfig::default();
        assert_eq!(cfg.global_capacity, arena.global_capacity);
        assert_eq!(cfg.stack_capacity, arena.stack_capacity);
        assert_eq!(cfg.rstack_capacity, arena.rstack_capacity);
    }

    #[test]
    fn builder_chains() {
        let cfg = VmConfig::default()
            .with_global_capacity(10)
            .with_stack_capacity(20)
            .with_rstack_capacity(30);
        assert_eq!(cfg.global_capacity, 10);
        assert_eq!(cfg.stack_capacity, 20);
        assert_eq!(cfg.rstack_capacity, 30);
    }
}
