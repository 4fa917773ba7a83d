use std::{cell::RefCell, collections::HashMap, fmt, io::Write, rc::Rc};

use crate::common::data::Value;
use crate::common::span::Span;
use crate::core::ffi::HostRegistry;
use crate::vm::error::{RuntimeError, RuntimeErrorKind};

/// A handle to a heap slot: a name paired with the address it
/// currently resolves to. A `Ref` is not the value — it's a pointer
/// to the `Var` that holds it, and can itself be passed around as a
/// by-reference argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    pub name: Rc<str>,
    pub addr: usize,
}

/// A heap cell: a value plus the number of live `Ref`s (across every
/// `Env`'s locals and every live closure's captured list) pointing at
/// it.
#[derive(Debug, Clone)]
struct Var {
    value: Value,
    refcount: usize,
}

/// The shared heap for one running program. Addresses are handed out
/// monotonically and never reused within a process, so a stale `Ref`
/// fails lookup rather than silently aliasing a different slot.
#[derive(Debug, Default)]
pub struct Mem {
    slots: HashMap<usize, Var>,
    next: usize,
}

impl Mem {
    pub fn new() -> Rc<RefCell<Mem>> {
        Rc::new(RefCell::new(Mem { slots: HashMap::new(), next: 0 }))
    }

    fn next_addr(&mut self) -> usize {
        let addr = self.next;
        self.next += 1;
        addr
    }

    /// The number of slots currently allocated. Used by tests to
    /// assert that a program leaves no dangling heap slots behind.
    pub fn live_slots(&self) -> usize {
        self.slots.len()
    }
}

/// A lexical scope frame: a table of locally-bound names, an optional
/// parent frame, a table of child namespaces, and a handle to the
/// shared heap. Cloning an `Env` is cheap — it just clones the `Rc`.
#[derive(Clone)]
pub struct Env(Rc<RefCell<Inner>>);

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Env(..)")
    }
}

struct Inner {
    locals: HashMap<String, Ref>,
    parent: Option<Env>,
    namespaces: HashMap<String, Env>,
    mem: Rc<RefCell<Mem>>,
    host: Option<Rc<dyn HostRegistry>>,
    output: Option<Rc<RefCell<dyn Write>>>,
}

impl Env {
    /// Creates the root environment, owning a fresh heap.
    pub fn root() -> Env {
        Env::with_mem(Mem::new(), None)
    }

    fn with_mem(mem: Rc<RefCell<Mem>>, parent: Option<Env>) -> Env {
        Env(Rc::new(RefCell::new(Inner {
            locals: HashMap::new(),
            parent,
            namespaces: HashMap::new(),
            mem,
            host: None,
            output: None,
        })))
    }

    /// Attaches a host adapter so `extern` expressions in this
    /// environment (and any child scope spawned from it) can reach it.
    pub fn install_host(&self, host: Rc<dyn HostRegistry>) {
        self.0.borrow_mut().host = Some(host);
    }

    /// The nearest installed host adapter, searching outward through
    /// parent scopes the same way name resolution does.
    pub fn host(&self) -> Option<Rc<dyn HostRegistry>> {
        if let Some(h) = self.0.borrow().host.clone() {
            return Some(h);
        }
        self.0.borrow().parent.clone().and_then(|p| p.host())
    }

    /// Redirects `print`/`println` to `sink` instead of the process's
    /// real stdout — how `tests/scenarios.rs` captures program output
    /// for assertions without shelling out to a subprocess.
    pub fn install_output(&self, sink: Rc<RefCell<dyn Write>>) {
        self.0.borrow_mut().output = Some(sink);
    }

    /// The nearest installed output sink, searching outward through
    /// parent scopes. `None` means the builtins should fall back to
    /// the process's real stdout.
    pub fn output(&self) -> Option<Rc<RefCell<dyn Write>>> {
        if let Some(o) = self.0.borrow().output.clone() {
            return Some(o);
        }
        self.0.borrow().parent.clone().and_then(|p| p.output())
    }

    /// Creates a child scope (a closure call frame, a `group`, a
    /// `namespace` body) sharing this environment's heap.
    pub fn child(&self) -> Env {
        let mem = Rc::clone(&self.0.borrow().mem);
        Env::with_mem(mem, Some(self.clone()))
    }

    pub fn parent(&self) -> Option<Env> {
        self.0.borrow().parent.clone()
    }

    pub fn ptr_eq(&self, other: &Env) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Allocates a fresh slot for `name` in this frame. Fails if
    /// `name` is already locally bound.
    pub fn make_ref(&self, name: &str, span: &Span) -> Result<Ref, RuntimeError> {
        if self.0.borrow().locals.contains_key(name) {
            return Err(RuntimeError::new(RuntimeErrorKind::NameRedefined(name.to_string()), span.clone()));
        }
        let addr = self.0.borrow().mem.borrow_mut().next_addr();
        self.0.borrow().mem.borrow_mut().slots.insert(addr, Var { value: Value::Nil, refcount: 1 });
        let r = Ref { name: Rc::from(name), addr };
        self.0.borrow_mut().locals.insert(name.to_string(), r.clone());
        Ok(r)
    }

    /// Resolves `name` — which may be namespaced as `ns1::ns2::name`
    /// — to a `Ref`, walking namespaces first, then the parent chain.
    pub fn get_ref(&self, name: &str, span: &Span) -> Result<Ref, RuntimeError> {
        if let Some((head, rest)) = name.split_once("::") {
            let ns = self.get_ns(head, span)?;
            return ns.get_ref(rest, span);
        }

        if let Some(r) = self.0.borrow().locals.get(name) {
            return Ok(r.clone());
        }
        match self.0.borrow().parent.clone() {
            Some(parent) => parent.get_ref(name, span),
            None => Err(RuntimeError::new(RuntimeErrorKind::NameUnbound(name.to_string()), span.clone())),
        }
    }

    /// Returns the existing local `Ref` for `name`, or allocates one.
    /// Used by plain assignment, which creates-or-updates.
    pub fn get_or_make_local(&self, name: &str, span: &Span) -> Result<Ref, RuntimeError> {
        if let Some(r) = self.0.borrow().locals.get(name) {
            return Ok(r.clone());
        }
        self.make_ref(name, span)
    }

    /// Allocates `name` and immediately writes `value` into it.
    pub fn new_assign(&self, name: &str, value: Value, span: &Span) -> Result<Ref, RuntimeError> {
        let r = self.make_ref(name, span)?;
        self.assign(&r, value, span)?;
        Ok(r)
    }

    pub fn assign(&self, r: &Ref, value: Value, span: &Span) -> Result<(), RuntimeError> {
        let mem = Rc::clone(&self.0.borrow().mem);
        let mut mem = mem.borrow_mut();
        match mem.slots.get_mut(&r.addr) {
            Some(var) => {
                var.value = value;
                Ok(())
            },
            None => Err(RuntimeError::new(
                RuntimeErrorKind::Internal(format!("slot {} for '{}' no longer exists", r.addr, r.name)),
                span.clone(),
            )),
        }
    }

    pub fn read(&self, r: &Ref, span: &Span) -> Result<Value, RuntimeError> {
        let mem = Rc::clone(&self.0.borrow().mem);
        let mem = mem.borrow();
        match mem.slots.get(&r.addr) {
            Some(var) => Ok(var.value.clone()),
            None => Err(RuntimeError::new(
                RuntimeErrorKind::Internal(format!("slot {} for '{}' no longer exists", r.addr, r.name)),
                span.clone(),
            )),
        }
    }

    /// Inserts a `Ref` directly into this frame's locals without
    /// allocating a new slot — used to bind by-reference parameters,
    /// which alias the caller's slot rather than copying into a new
    /// one.
    pub fn bind_ref(&self, name: &str, r: Ref) {
        self.incref(&r);
        self.0.borrow_mut().locals.insert(name.to_string(), r);
    }

    pub fn incref(&self, r: &Ref) {
        let mem = Rc::clone(&self.0.borrow().mem);
        if let Some(var) = mem.borrow_mut().slots.get_mut(&r.addr) {
            var.refcount += 1;
        }
    }

    /// Decrements the slot's refcount, freeing it once it reaches
    /// zero. Decrementing a slot that no longer exists is a no-op —
    /// this happens when a by-reference parameter's frame is torn
    /// down after the referenced outer slot was already freed by some
    /// other path.
    pub fn decref(&self, r: &Ref) {
        let mem = Rc::clone(&self.0.borrow().mem);
        let mut mem = mem.borrow_mut();
        let delete = match mem.slots.get_mut(&r.addr) {
            Some(var) => {
                var.refcount -= 1;
                var.refcount == 0
            },
            None => false,
        };
        if delete {
            mem.slots.remove(&r.addr);
        }
    }

    /// Decrements every local `Ref` in this frame once. Called when a
    /// scope (closure call, `group`, `import`) tears down, on every
    /// exit path including non-local exits.
    pub fn cleanup(&self) {
        let refs: Vec<Ref> = self.0.borrow().locals.values().cloned().collect();
        for r in refs {
            self.decref(&r);
        }
    }

    pub fn get_ns(&self, name: &str, span: &Span) -> Result<Env, RuntimeError> {
        if let Some(ns) = self.0.borrow().namespaces.get(name) {
            return Ok(ns.clone());
        }
        match self.0.borrow().parent.clone() {
            Some(parent) => parent.get_ns(name, span),
            None => Err(RuntimeError::new(RuntimeErrorKind::NameUnbound(format!("namespace '{}'", name)), span.clone())),
        }
    }

    pub fn get_or_create_ns(&self, name: &str) -> Env {
        if let Some(ns) = self.0.borrow().namespaces.get(name) {
            return ns.clone();
        }
        let ns = self.child();
        self.0.borrow_mut().namespaces.insert(name.to_string(), ns.clone());
        ns
    }

    /// The number of heap slots currently allocated in this
    /// environment's shared `Mem` — used by leak-detecting tests.
    pub fn live_slots(&self) -> usize {
        self.0.borrow().mem.borrow().live_slots()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::source::Source;

    fn span() -> Span {
        let source = Source::source("x");
        Span::new(&source, 0, 1)
    }

    #[test]
    fn make_and_read() {
        let env = Env::root();
        let r = env.new_assign("x", Value::Int(5), &span()).unwrap();
        assert_eq!(env.read(&r, &span()).unwrap(), Value::Int(5));
    }

    #[test]
    fn redefine_fails() {
        let env = Env::root();
        env.new_assign("x", Value::Nil, &span()).unwrap();
        assert!(env.make_ref("x", &span()).is_err());
    }

    #[test]
    fn parent_lookup() {
        let root = Env::root();
        root.new_assign("x", Value::Int(1), &span()).unwrap();
        let child = root.child();
        let r = child.get_ref("x", &span()).unwrap();
        assert_eq!(child.read(&r, &span()).unwrap(), Value::Int(1));
    }

    #[test]
    fn cleanup_frees_slots() {
        let root = Env::root();
        let child = root.child();
        child.new_assign("y", Value::Int(2), &span()).unwrap();
        assert_eq!(root.live_slots(), 1);
        child.cleanup();
        assert_eq!(root.live_slots(), 0);
    }

    #[test]
    fn namespace_roundtrip() {
        let root = Env::root();
        let ns = root.get_or_create_ns("math");
        ns.new_assign("pi", Value::Float(3.14), &span()).unwrap();
        let r = root.get_ref("math::pi", &span()).unwrap();
        assert_eq!(root.get_ns("math", &span()).unwrap().read(&r, &span()).unwrap(), Value::Float(3.14));
    }
}
