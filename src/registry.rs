//! Simulated programs, looked up by name when a process runs

use crate::context::ProcessContext;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// A simulated executable. Returns the exit status.
pub trait Program: Send + Sync {
    fn run(&self, process: &mut ProcessContext) -> i32;
}

impl<F> Program for F
where
    F: Fn(&mut ProcessContext) -> i32 + Send + Sync,
{
    fn run(&self, process: &mut ProcessContext) -> i32 {
        self(process)
    }
}

/// Every program the honeypot can run, built once at startup and shared
/// read-only afterwards
#[derive(Clone, Default)]
pub struct Registry {
    programs: BTreeMap<String, Arc<dyn Program>>,
}

impl Registry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Add or replace a program under its command name
    pub fn register<S, P>(mut self, name: S, program: P) -> Self
    where
        S: Into<String>,
        P: Program + 'static,
    {
        self.programs.insert(name.into(), Arc::new(program));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Program>> {
        self.programs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.programs.keys().map(String::as_str)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
