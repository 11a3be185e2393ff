//! The JIT driver: decompile on demand, cache by entry address, evict on
//! writes, loop on successor addresses.
//!
//! The method cache is the sole registry of decompiled functions;
//! functions refer to each other by 16-bit address, so eviction never
//! breaks a reference. The cache is shared (single-threaded, so
//! `Rc<RefCell<...>>`) with the HAL: every memory write funnels through
//! [`MethodCache::note_write`], which drops any cached function whose
//! byte range covers the written address and reports whether the
//! currently-running function was hit — that report is what arms the
//! recompilation latch the lowered IR polls after each store.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::codegen::{compile, CompiledRoutine};
use crate::disassembler::{decompile, ByteRange};
use crate::error::{ExecutionError, JitError};
use crate::hal::Hal;
use crate::interpreter::interpret;
use crate::ir::Instruction;
use crate::lowering::lower_function;

/// How a cached function executes.
pub enum MethodKind {
    Compiled(CompiledRoutine),
    /// Self-modifying functions run on the interpreter, which re-checks
    /// the recompilation latch after every store.
    Interpreted { ir: Vec<Instruction>, locals: usize },
}

/// A decompiled function bound to its executable form and the byte range
/// that invalidates it.
pub struct CachedMethod {
    pub entry: u16,
    pub kind: MethodKind,
    pub byte_range: ByteRange,
}

impl CachedMethod {
    fn execute(&self, hal: &mut dyn Hal) -> Result<i32, ExecutionError> {
        match &self.kind {
            MethodKind::Compiled(routine) => routine.run(hal),
            MethodKind::Interpreted { ir, locals } => interpret(ir, *locals, hal),
        }
    }

    pub fn is_interpreted(&self) -> bool {
        matches!(self.kind, MethodKind::Interpreted { .. })
    }
}

/// Decompiled functions keyed by entry address.
#[derive(Default)]
pub struct MethodCache {
    methods: FxHashMap<u16, Rc<CachedMethod>>,
    executing: Option<(u16, ByteRange)>,
}

impl MethodCache {
    pub fn new() -> MethodCache {
        MethodCache::default()
    }

    pub fn get(&self, entry: u16) -> Option<Rc<CachedMethod>> {
        self.methods.get(&entry).cloned()
    }

    pub fn insert(&mut self, method: CachedMethod) -> Rc<CachedMethod> {
        let entry = method.entry;
        let method = Rc::new(method);
        self.methods.insert(entry, method.clone());
        method
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn contains(&self, entry: u16) -> bool {
        self.methods.contains_key(&entry)
    }

    fn set_executing(&mut self, entry: u16, byte_range: ByteRange) {
        self.executing = Some((entry, byte_range));
    }

    fn clear_executing(&mut self) {
        self.executing = None;
    }

    /// A byte at `address` was written. Evict every method whose range
    /// covers it; report whether the currently-executing function was
    /// among the casualties.
    pub fn note_write(&mut self, address: u16) -> bool {
        let before = self.methods.len();
        self.methods
            .retain(|_, method| !method.byte_range.contains(address));
        let evicted = before - self.methods.len();
        if evicted > 0 {
            tracing::debug!(
                target: "jit6502::jit",
                address,
                evicted,
                "write into cached code, methods evicted"
            );
        }
        matches!(self.executing, Some((_, range)) if range.contains(address))
    }
}

/// Driver knobs. `force_interpreter` drops the compiled backend entirely
/// (every function interprets); `trace_lowering` makes each executed 6502
/// instruction report its listing line through the debug hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub recent_capacity: usize,
    pub force_interpreter: bool,
    pub trace_lowering: bool,
}

impl Default for DriverConfig {
    fn default() -> DriverConfig {
        DriverConfig {
            recent_capacity: 32,
            force_interpreter: false,
            trace_lowering: false,
        }
    }
}

/// Decompiles functions on demand and runs them until a routine yields a
/// terminal successor.
pub struct JitDriver {
    cache: Rc<RefCell<MethodCache>>,
    recent: VecDeque<u16>,
    pub config: DriverConfig,
}

impl JitDriver {
    pub fn new(config: DriverConfig) -> JitDriver {
        JitDriver {
            cache: Rc::new(RefCell::new(MethodCache::new())),
            recent: VecDeque::new(),
            config,
        }
    }

    /// The shared cache handle, for wiring into
    /// [`crate::hal::BusHal::attach_cache`].
    pub fn cache(&self) -> Rc<RefCell<MethodCache>> {
        self.cache.clone()
    }

    /// Addresses of recently entered functions, oldest first.
    pub fn recent_entries(&self) -> impl Iterator<Item = u16> + '_ {
        self.recent.iter().copied()
    }

    /// Run from `entry` until a routine yields the terminal sentinel.
    /// Fails with the triggering 6502 address on decode, lowering, or
    /// execution errors; host cancellation surfaces as a
    /// [`JitError::is_cancellation`] error.
    pub fn run(&mut self, hal: &mut dyn Hal, entry: u16) -> Result<(), JitError> {
        let mut next: i32 = entry as i32;
        while next >= 0 {
            let address = next as u16;
            let method = self.method_for(hal, address)?;

            self.cache
                .borrow_mut()
                .set_executing(address, method.byte_range);
            self.recent.push_back(address);
            while self.recent.len() > self.config.recent_capacity {
                self.recent.pop_front();
            }

            let outcome = method.execute(hal);
            self.cache.borrow_mut().clear_executing();
            next = outcome.map_err(|error| JitError::at(address, error))?;
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            let trail = self
                .recent
                .iter()
                .map(|address| format!("{address:#06x}"))
                .collect::<Vec<_>>()
                .join(" -> ");
            tracing::debug!(target: "jit6502::jit", entry, trail = %trail, "run finished");
        }
        Ok(())
    }

    /// Cache lookup, building the method on a miss.
    fn method_for(
        &mut self,
        hal: &mut dyn Hal,
        address: u16,
    ) -> Result<Rc<CachedMethod>, JitError> {
        if let Some(method) = self.cache.borrow().get(address) {
            return Ok(method);
        }

        let regions = hal.code_regions();
        let body =
            decompile(address, &regions).map_err(|error| JitError::at(address, error))?;
        let lowered = lower_function(&body, self.config.trace_lowering)
            .map_err(|error| JitError::at(address, error))?;

        let kind = if lowered.is_self_modifying || self.config.force_interpreter {
            tracing::debug!(
                target: "jit6502::jit",
                entry = address,
                self_modifying = lowered.is_self_modifying,
                "taking the interpreter path"
            );
            MethodKind::Interpreted {
                ir: lowered.ir,
                locals: lowered.locals,
            }
        } else {
            tracing::debug!(target: "jit6502::jit", entry = address, "compiling");
            MethodKind::Compiled(
                compile(&lowered.ir).map_err(|error| JitError::at(address, error))?,
            )
        };

        Ok(self.cache.borrow_mut().insert(CachedMethod {
            entry: address,
            kind,
            byte_range: lowered.byte_range,
        }))
    }
}
