//! Execution tracing hooks.
//!
//! A [`VmTracer`] observes interpreter and collector events. The default is
//! [`NoopTracer`]; [`StderrTracer`] prints every event and is useful when
//! debugging bytecode by hand.

use crate::bytecode::Opcode;
use crate::heap::{GcStats, GcTrigger};

/// Observer for interpreter and collector events. All hooks default to
/// no-ops.
pub trait VmTracer {
    /// Called before each instruction executes.
    fn instruction(&mut self, _op: Opcode, _pc: usize) {}

    /// Called when a bytecode function call pushes a frame.
    fn call(&mut self, _callee: &str, _argc: u32) {}

    /// Called after each collection.
    fn gc(&mut self, _trigger: GcTrigger, _stats: &GcStats) {}
}

/// The default tracer: observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Prints every event to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn instruction(&mut self, op: Opcode, pc: usize) {
        eprintln!("[veld] {pc:06}: {op}");
    }

    fn call(&mut self, callee: &str, argc: u32) {
        eprintln!("[veld] call {callee}/{argc}");
    }

    fn gc(&mut self, trigger: GcTrigger, stats: &GcStats) {
        eprintln!(
            "[veld] gc ({trigger}): collected {}, surviving {} ({} bytes)",
            stats.collected_objects, stats.surviving_objects, stats.surviving_bytes
        );
    }
}
