//! The execution context: one heap, one module registry, one scheduler.
//!
//! A [`Context`] owns everything a running program touches. It is
//! single-threaded by construction (`Rc` state makes it neither `Send` nor
//! `Sync`); all mutation happens through the owning thread's calls. The
//! embedder API surface lives here: loading and registering modules,
//! resolving imports, running callables, integrating native functions, and
//! driving the collector.

use std::any::Any;
use std::rc::Rc;

use ahash::AHashSet;

use crate::bytecode::BytecodeModule;
use crate::error::{ErrorKind, VmError, VmResult};
use crate::heap::{GcTrigger, Heap, HeapData, HeapId, HeapLimits, HeapStats};
use crate::intern::Interner;
use crate::interp::{SliceOutcome, Vm};
use crate::loader;
use crate::registry::ModuleRegistry;
use crate::roots::{Global, RootSet, Scope};
use crate::schedule::{ResumeToken, Scheduler};
use crate::tracer::{NoopTracer, VmTracer};
use crate::types::coroutine::{Coroutine, CoroutineState};
use crate::types::methods::TypeSystem;
use crate::types::native::{Finalizer, NativeCtx, NativeFunction, NativeKind};
use crate::types::string::Str;
use crate::types::Type;
use crate::value::{extract_integer, make_integer, type_of, value_to_string, Value};

/// Tunables for a context.
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    /// Crossing this many live bytes records an `AllocFailure` collection
    /// trigger, honored at the next safe point.
    pub soft_heap_limit: Option<usize>,
    /// Crossing this many live bytes fails allocations with `OutOfMemory`.
    pub hard_heap_limit: Option<usize>,
}

/// An isolated execution environment.
pub struct Context {
    heap: Heap,
    roots: Rc<RootSet>,
    interner: Interner,
    types: TypeSystem,
    registry: ModuleRegistry,
    scheduler: Scheduler,
    tracer: Box<dyn VmTracer>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default()).expect("an unlimited heap cannot fail to initialize")
    }

    pub fn with_config(config: ContextConfig) -> VmResult<Self> {
        let mut heap = Heap::new(HeapLimits {
            soft_limit: config.soft_heap_limit,
            hard_limit: config.hard_heap_limit,
        });
        let mut interner = Interner::new();
        let types = TypeSystem::new(&mut heap, &mut interner)?;
        Ok(Self {
            heap,
            roots: Rc::new(RootSet::new()),
            interner,
            types,
            registry: ModuleRegistry::new(),
            scheduler: Scheduler::new(),
            tracer: Box::new(NoopTracer),
        })
    }

    /// Replaces the execution tracer.
    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.tracer = tracer;
    }

    // ----- handles -------------------------------------------------------

    /// Opens a handle scope. Values pinned in it survive collections for
    /// the scope's lifetime.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::new(Rc::clone(&self.roots))
    }

    /// Pins a value for an arbitrary lifetime.
    #[must_use]
    pub fn global(&self, value: Value) -> Global {
        Global::new(Rc::clone(&self.roots), value)
    }

    // ----- value constructors and accessors ------------------------------

    /// An integer value, embedded or boxed as needed.
    pub fn integer(&mut self, value: i64) -> VmResult<Value> {
        make_integer(&mut self.heap, value)
    }

    pub fn float(&mut self, value: f64) -> VmResult<Value> {
        Ok(Value::Ref(self.heap.allocate(HeapData::Float(value))?))
    }

    /// A fresh, non-interned string.
    pub fn string(&mut self, text: &str) -> VmResult<Value> {
        Ok(Value::Ref(self.heap.allocate(HeapData::Str(Str::new(text)))?))
    }

    /// The interned string for `text`.
    pub fn intern_string(&mut self, text: &str) -> VmResult<Value> {
        Ok(Value::Ref(self.interner.intern(&mut self.heap, text)?))
    }

    /// Interns an existing string value (the `String.intern` operation).
    pub fn intern_value(&mut self, value: Value) -> VmResult<Value> {
        let id = value
            .heap_id()
            .filter(|&id| matches!(self.heap.get(id), HeapData::Str(_)))
            .ok_or_else(|| VmError::type_error("only strings can be interned"))?;
        Ok(Value::Ref(self.interner.intern_existing(&mut self.heap, id)?))
    }

    /// The context-wide symbol named `name`.
    pub fn symbol(&mut self, name: &str) -> VmResult<Value> {
        Ok(Value::Ref(self.interner.symbol(&mut self.heap, name)?))
    }

    #[must_use]
    pub fn type_of(&self, value: Value) -> Type {
        type_of(&self.heap, value)
    }

    /// Reads an embedded or boxed integer.
    #[must_use]
    pub fn as_int(&self, value: Value) -> Option<i64> {
        extract_integer(&self.heap, value)
    }

    /// Reads a string's text.
    #[must_use]
    pub fn as_str(&self, value: Value) -> Option<&str> {
        match value.heap_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Str(s)) => Some(s.text()),
            _ => None,
        }
    }

    /// Renders a value for diagnostics.
    #[must_use]
    pub fn display(&self, value: Value) -> String {
        value_to_string(&self.heap, value)
    }

    // ----- native integration --------------------------------------------

    /// Registers a synchronous native function value.
    pub fn native_function(&mut self, name: &str, min_params: u32, callback: crate::NativeSyncFn) -> VmResult<Value> {
        let name = self.interner.intern(&mut self.heap, name)?;
        let id = self.heap.allocate(HeapData::NativeFunction(NativeFunction::new(
            name,
            min_params,
            NativeKind::Sync(callback),
        )))?;
        Ok(Value::Ref(id))
    }

    /// Registers an asynchronous native function value. The callback
    /// receives a [`ResumeToken`]; the calling coroutine parks until the
    /// host fulfills it via [`Context::resume`].
    pub fn native_async_function(
        &mut self,
        name: &str,
        min_params: u32,
        callback: crate::NativeAsyncFn,
    ) -> VmResult<Value> {
        let name = self.interner.intern(&mut self.heap, name)?;
        let id = self.heap.allocate(HeapData::NativeFunction(NativeFunction::new(
            name,
            min_params,
            NativeKind::Async(callback),
        )))?;
        Ok(Value::Ref(id))
    }

    /// Wraps opaque host data, optionally with a sweep-time finalizer.
    pub fn native_object(&mut self, data: Box<dyn Any>, finalizer: Option<Finalizer>) -> VmResult<Value> {
        let mut ctx = NativeCtx {
            heap: &mut self.heap,
            interner: &mut self.interner,
        };
        ctx.native_object(data, finalizer)
    }

    /// Borrows the host data of a native object value.
    #[must_use]
    pub fn native_data<T: 'static>(&self, value: Value) -> Option<&T> {
        let id = value.heap_id()?;
        match self.heap.get(id) {
            HeapData::NativeObject(native) => native.data().downcast_ref::<T>(),
            _ => None,
        }
    }

    // ----- containers ----------------------------------------------------

    /// A fresh growable array.
    pub fn array(&mut self, capacity: usize) -> VmResult<Value> {
        Ok(Value::Ref(
            self.heap
                .allocate(HeapData::Array(crate::types::tuple::Array::with_capacity(capacity)))?,
        ))
    }

    pub fn array_append(&mut self, array: Value, value: Value) -> VmResult<()> {
        let id = self.expect_kind(array, Type::Array)?;
        match self.heap.get_mut(id) {
            HeapData::Array(a) => {
                a.append(value);
                Ok(())
            }
            _ => unreachable!("expect_kind verified the kind"),
        }
    }

    #[must_use]
    pub fn array_get(&self, array: Value, index: usize) -> Option<Value> {
        match array.heap_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Array(a)) => a.get(index),
            _ => None,
        }
    }

    #[must_use]
    pub fn array_len(&self, array: Value) -> Option<usize> {
        match array.heap_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Array(a)) => Some(a.len()),
            _ => None,
        }
    }

    /// A fresh ordered hash table.
    pub fn table(&mut self) -> VmResult<Value> {
        Ok(Value::Ref(
            self.heap
                .allocate(HeapData::Table(crate::types::table::Table::new()))?,
        ))
    }

    /// Inserts or overwrites; true when the key was newly inserted.
    pub fn table_set(&mut self, table: Value, key: Value, value: Value) -> VmResult<bool> {
        let id = self.expect_kind(table, Type::Table)?;
        Ok(crate::types::table::table_set(&mut self.heap, id, key, value))
    }

    #[must_use]
    pub fn table_get(&self, table: Value, key: Value) -> Option<Value> {
        let id = table.heap_id()?;
        match self.heap.get(id) {
            HeapData::Table(t) => t.get(&self.heap, key),
            _ => None,
        }
    }

    /// Binds a receiver to a callable; calling the result inserts the
    /// receiver as the implicit first argument.
    pub fn bound_method(&mut self, function: Value, receiver: Value) -> VmResult<Value> {
        Ok(Value::Ref(self.heap.allocate(HeapData::BoundMethod(
            crate::types::function::BoundMethod { function, receiver },
        ))?))
    }

    // ----- modules -------------------------------------------------------

    /// Materializes a compiled module into live objects. The module is not
    /// registered or initialized yet.
    pub fn load_module(&mut self, compiled: &BytecodeModule) -> VmResult<Value> {
        loader::load_module(&mut self.heap, &mut self.interner, Rc::clone(&self.roots), compiled)
    }

    /// Registers a loaded module. Returns false when a module with the same
    /// name is already registered.
    pub fn add_module(&mut self, module: Value) -> VmResult<bool> {
        let id = self.expect_module(module)?;
        let name = match self.heap.get(id) {
            HeapData::Module(m) => m.name(),
            _ => unreachable!("expect_module verified the kind"),
        };
        Ok(self.registry.add(name, id))
    }

    /// Looks up a registered module by name, resolving it (imports plus
    /// one-shot initializer) on first access.
    pub fn get_module(&mut self, name: &str) -> VmResult<Option<Value>> {
        let name = self.interner.intern(&mut self.heap, name)?;
        let Some(module) = self.registry.find(name) else {
            return Ok(None);
        };
        self.resolve_module(Value::Ref(module))?;
        Ok(Some(Value::Ref(module)))
    }

    /// Resolves a module: replaces unresolved imports depth-first and runs
    /// each affected module's initializer exactly once. Idempotent.
    pub fn resolve_module(&mut self, module: Value) -> VmResult<()> {
        let module_id = self.expect_module(module)?;
        if self.module_initialized(module_id) {
            return Ok(());
        }

        let scope = self.scope();
        scope.local(module);

        // Explicit resolution stack; (module, next member to examine).
        let mut stack: Vec<(HeapId, usize)> = vec![(module_id, 0)];
        let mut in_progress: AHashSet<HeapId> = AHashSet::new();
        in_progress.insert(module_id);

        while let Some(&(current, next)) = stack.last() {
            match self.resolve_members_from(current, next)? {
                MemberScan::Recurse { resume_at, imported } => {
                    stack.last_mut().expect("stack is non-empty").1 = resume_at;
                    if in_progress.contains(&imported) {
                        let mut chain: Vec<String> = stack
                            .iter()
                            .map(|&(id, _)| self.module_name_text(id))
                            .collect();
                        chain.push(self.module_name_text(imported));
                        return Err(VmError::import_cycle(&chain));
                    }
                    in_progress.insert(imported);
                    stack.push((imported, 0));
                }
                MemberScan::Finished => {
                    let init = match self.heap.get(current) {
                        HeapData::Module(m) => m.init(),
                        _ => unreachable!("resolution stack holds modules"),
                    };
                    if let Some(init) = init {
                        self.run_init(init)?;
                    }
                    match self.heap.get_mut(current) {
                        HeapData::Module(m) => m.set_initialized(),
                        _ => unreachable!("resolution stack holds modules"),
                    }
                    in_progress.remove(&current);
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Looks up an exported member of a resolved module.
    pub fn get_export(&mut self, module: Value, name: &str) -> VmResult<Option<Value>> {
        let id = self.expect_module(module)?;
        let symbol = self.interner.symbol(&mut self.heap, name)?;
        match self.heap.get(id) {
            HeapData::Module(m) => Ok(m.find_exported(&self.heap, symbol)),
            _ => unreachable!("expect_module verified the kind"),
        }
    }

    // ----- execution -----------------------------------------------------

    /// Creates a coroutine for `callable` and enqueues it. The returned
    /// value is the coroutine object.
    pub fn spawn(&mut self, callable: Value, args: &[Value]) -> VmResult<Value> {
        // Coroutine names are plain strings; interning them would pin every
        // finished coroutine's name for the context lifetime.
        let name = self.scheduler.next_coroutine_name();
        let name = self.heap.allocate(HeapData::Str(Str::new(name)))?;
        let coro = self
            .heap
            .allocate(HeapData::Coroutine(Coroutine::new(name, callable, args.to_vec())))?;
        self.scheduler.enqueue(coro);
        Ok(Value::Ref(coro))
    }

    /// Runs `callable` to completion and returns its result.
    ///
    /// Fails with `Pending` if the run loop goes idle while the coroutine
    /// still waits on an unfulfilled resume token; async embedders should
    /// use [`Context::spawn`] / [`Context::run_until_idle`] /
    /// [`Context::resume`] instead.
    pub fn run(&mut self, callable: Value, args: &[Value]) -> VmResult<Value> {
        let scope = self.scope();
        let coro = self.spawn(callable, args)?;
        scope.local(coro);
        self.run_loop()?;
        match self.coroutine_result(coro) {
            Some(result) => result,
            None => Err(VmError::new(
                ErrorKind::Pending,
                "coroutine is still waiting on an unfulfilled resume token",
            )),
        }
    }

    /// Drives the run loop until no coroutine is ready.
    pub fn run_until_idle(&mut self) -> VmResult<()> {
        self.run_loop()
    }

    /// Fulfills a resume token: pushes `value` as the pending native call's
    /// result and re-enqueues the coroutine. Must be called on the owning
    /// thread, outside the run loop.
    pub fn resume(&mut self, token: ResumeToken, value: Value) -> VmResult<()> {
        let coroutine = match self.heap.get_mut(token.coroutine) {
            HeapData::Coroutine(c) => c,
            _ => return Err(VmError::type_error("resume token does not name a coroutine")),
        };
        if coroutine.state() != CoroutineState::Waiting || coroutine.pending_token() != Some(token.serial) {
            return Err(VmError::type_error("stale or invalid resume token"));
        }
        coroutine.set_pending_token(None);
        coroutine.set_state(CoroutineState::Ready);
        coroutine
            .stack_mut()
            .expect("waiting coroutine retains its stack")
            .set_top(0, value);
        self.scheduler.enqueue(token.coroutine);
        Ok(())
    }

    /// The scheduling state of a coroutine value.
    #[must_use]
    pub fn coroutine_state(&self, coroutine: Value) -> Option<CoroutineState> {
        match coroutine.heap_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Coroutine(c)) => Some(c.state()),
            _ => None,
        }
    }

    /// The result of a completed coroutine; `None` while it is still
    /// pending.
    #[must_use]
    pub fn coroutine_result(&self, coroutine: Value) -> Option<VmResult<Value>> {
        match coroutine.heap_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Coroutine(c)) => c.result().cloned(),
            _ => None,
        }
    }

    // ----- garbage collection --------------------------------------------

    /// Forces a full collection.
    pub fn collect_garbage(&mut self) {
        self.collect_with(GcTrigger::Forced);
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Number of live heap objects; drops back to its baseline once
    /// unreferenced values are collected.
    #[must_use]
    pub fn allocated_objects(&self) -> usize {
        self.heap.live_objects()
    }

    // ----- internals -----------------------------------------------------

    fn expect_module(&self, value: Value) -> VmResult<HeapId> {
        value
            .heap_id()
            .filter(|&id| matches!(self.heap.get(id), HeapData::Module(_)))
            .ok_or_else(|| VmError::type_error("value is not a module"))
    }

    fn expect_kind(&self, value: Value, expected: Type) -> VmResult<HeapId> {
        value
            .heap_id()
            .filter(|&id| self.heap.get(id).type_of() == expected)
            .ok_or_else(|| VmError::type_error(format!("value is not a {expected}")))
    }

    fn module_initialized(&self, module: HeapId) -> bool {
        match self.heap.get(module) {
            HeapData::Module(m) => m.initialized(),
            _ => unreachable!("caller verified the kind"),
        }
    }

    fn module_name_text(&self, module: HeapId) -> String {
        match self.heap.get(module) {
            HeapData::Module(m) => m.name_text(&self.heap).to_string(),
            _ => "<corrupt module>".to_string(),
        }
    }

    /// Scans a module's members from `next`, replacing unresolved imports.
    /// Stops early when an uninitialized imported module requires a
    /// depth-first recursion step.
    fn resolve_members_from(&mut self, module: HeapId, mut next: usize) -> VmResult<MemberScan> {
        let members = match self.heap.get(module) {
            HeapData::Module(m) => m.members(),
            _ => unreachable!("resolution stack holds modules"),
        };
        let count = match self.heap.get(members) {
            HeapData::Tuple(t) => t.len(),
            _ => unreachable!("members slot holds a non-tuple"),
        };

        while next < count {
            let member = match self.heap.get(members) {
                HeapData::Tuple(t) => t.get(next).expect("index in range"),
                _ => unreachable!("members slot holds a non-tuple"),
            };
            let import_name = match member.heap_id().map(|id| self.heap.get(id)) {
                Some(HeapData::UnresolvedImport(import)) => Some(import.name()),
                _ => None,
            };
            let Some(import_name) = import_name else {
                next += 1;
                continue;
            };

            let Some(imported) = self.registry.find(import_name) else {
                let name = match self.heap.get(import_name) {
                    HeapData::Str(s) => s.text().to_string(),
                    _ => "<corrupt import>".to_string(),
                };
                return Err(VmError::unknown_module(&name));
            };

            match self.heap.get_mut(members) {
                HeapData::Tuple(t) => {
                    t.set(next, Value::Ref(imported));
                }
                _ => unreachable!("members slot holds a non-tuple"),
            }
            next += 1;

            if !self.module_initialized(imported) {
                return Ok(MemberScan::Recurse {
                    resume_at: next,
                    imported,
                });
            }
        }
        Ok(MemberScan::Finished)
    }

    /// Runs a module initializer through the scheduler. Resolution is a
    /// host-level operation; it cannot be re-entered from inside the run
    /// loop.
    fn run_init(&mut self, init: Value) -> VmResult<()> {
        if self.scheduler.in_loop() {
            return Err(VmError::type_error(
                "module resolution cannot run inside the scheduler loop",
            ));
        }
        self.run(init, &[])?;
        Ok(())
    }

    fn run_loop(&mut self) -> VmResult<()> {
        if self.scheduler.in_loop() {
            // A nested run request (e.g. spawn from a host callback in the
            // future) is drained by the outer loop.
            return Ok(());
        }
        self.scheduler.set_in_loop(true);
        let result = self.run_loop_inner();
        self.scheduler.set_in_loop(false);
        result
    }

    fn run_loop_inner(&mut self) -> VmResult<()> {
        while let Some(coro) = self.scheduler.dequeue() {
            let is_ready = match self.heap.get_mut(coro) {
                HeapData::Coroutine(c) if c.state() == CoroutineState::Ready => {
                    c.set_state(CoroutineState::Running);
                    true
                }
                _ => false,
            };
            if !is_ready {
                continue;
            }

            self.scheduler.set_current(Some(coro));
            loop {
                let outcome = {
                    let mut vm = Vm {
                        heap: &mut self.heap,
                        interner: &mut self.interner,
                        types: &self.types,
                        scheduler: &mut self.scheduler,
                        tracer: self.tracer.as_mut(),
                    };
                    vm.run_slice(coro)
                };
                match outcome {
                    SliceOutcome::Done | SliceOutcome::Waiting => break,
                    SliceOutcome::GcPause => {
                        let trigger = self.heap.due_trigger().unwrap_or(GcTrigger::Automatic);
                        self.collect_with(trigger);
                    }
                }
            }
            self.scheduler.set_current(None);

            if let Some(trigger) = self.heap.due_trigger() {
                self.collect_with(trigger);
            }
        }
        Ok(())
    }

    fn collect_with(&mut self, trigger: GcTrigger) {
        let roots = self.gather_roots();
        let stats = self.heap.collect(trigger, &roots);
        self.tracer.gc(trigger, &stats);
    }

    fn gather_roots(&self) -> Vec<HeapId> {
        let mut work = Vec::with_capacity(64 + self.registry.len() * 2);
        self.roots.collect_roots(&mut work);
        self.interner.collect_roots(&mut work);
        self.types.collect_roots(&mut work);
        self.registry.collect_roots(&mut work);
        self.scheduler.collect_roots(&mut work);
        work
    }
}

enum MemberScan {
    /// An uninitialized import needs its own resolution frame.
    Recurse { resume_at: usize, imported: HeapId },
    /// All members of the frame are resolved.
    Finished,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("heap", &self.heap)
            .field("modules", &self.registry.len())
            .finish_non_exhaustive()
    }
}
