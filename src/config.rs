// Tunables for one running machine. Library embedders build this with
// `VmConfig::default()` or the builder methods; the `classvm-run` binary
// derives the same fields from the command line via `clap`, so the
// config type itself stays free of any CLI dependency.

use clap::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Objects a single thread's arena can hold before a minor collection
    /// is forced at the next allocation safe-point.
    pub arena_capacity: usize,
    /// Initial capacity of the resolver's class-name hash map.
    pub class_table_capacity: usize,
    /// Initial capacity reserved for one thread's protector chain.
    pub protector_chain_capacity: usize,
    /// Ceiling on a frame's `max_stack + sp` before `invoke*` synthesizes
    /// `StackOverflowError` instead of pushing a new frame.
    pub max_stack_depth: usize,
}

impl Default for VmConfig {
    fn default() -> VmConfig {
        VmConfig {
            arena_capacity: 4096,
            class_table_capacity: 64,
            protector_chain_capacity: 8,
            max_stack_depth: 4096,
        }
    }
}

impl VmConfig {
    pub fn with_arena_capacity(mut self, capacity: usize) -> VmConfig {
        self.arena_capacity = capacity;
        self
    }

    pub fn with_max_stack_depth(mut self, depth: usize) -> VmConfig {
        self.max_stack_depth = depth;
        self
    }
}

/// Command-line surface for the demonstration binary. Kept separate from
/// `VmConfig` itself so the library half of the crate never pulls in
/// `clap` at the type level.
#[derive(Debug, Parser)]
#[command(name = "classvm-run", about = "Run a class#method entry point to completion")]
pub struct Cli {
    /// `;`-separated list of extra classpath directories, searched after
    /// the current directory.
    #[arg(short = 'c', long = "classpath", default_value = "")]
    pub classpath: String,

    /// Per-thread arena capacity (object count) before a minor collection
    /// is forced.
    #[arg(long = "arena-capacity", default_value_t = VmConfig::default().arena_capacity)]
    pub arena_capacity: usize,

    /// `Class#method` entry point, e.g. `Main#main`.
    pub entry_point: String,
}

impl Cli {
    pub fn vm_config(&self) -> VmConfig {
        VmConfig::default().with_arena_capacity(self.arena_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let c = VmConfig::default();
        assert!(c.arena_capacity > 0);
        assert!(c.max_stack_depth > 0);
    }

    #[test]
    fn builder_methods_override_defaults() {
        let c = VmConfig::default().with_arena_capacity(10).with_max_stack_depth(20);
        assert_eq!(c.arena_capacity, 10);
        assert_eq!(c.max_stack_depth, 20);
    }
}
