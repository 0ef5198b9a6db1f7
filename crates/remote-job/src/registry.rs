//! The task registry: the systems-language stand-in for the original's
//! dynamic `exec`-and-instantiate dance.
//!
//! `INIT_OBJECT` carries an opaque descriptor string plus constructor
//! arguments. Instead of shipping source and `exec`-ing a named class, the
//! job resolves the descriptor against a process-wide map from descriptor
//! to constructor, installed by whatever embeds this crate (tests register
//! fixtures directly; a real deployment would register one constructor per
//! supported task at startup, optionally loading plugins from the bundle's
//! scratch directory).

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use hooteproto::CallArguments;
use serde_json::Value;

/// Why a `CALL` or construction attempt failed, already classified into the
/// taxonomy the wire protocol distinguishes.
#[derive(Debug, Clone)]
pub enum CallFailure {
    /// `CALL` named a method the object does not expose.
    MissingAttribute(String),
    /// The call arguments could not be decoded into what the method expects.
    Deserialize(String),
    /// The method's return value could not be encoded for the reply.
    Serialize(String),
    /// Any other failure raised by user code.
    User(String),
}

impl CallFailure {
    pub fn message(&self) -> &str {
        match self {
            CallFailure::MissingAttribute(m)
            | CallFailure::Deserialize(m)
            | CallFailure::Serialize(m)
            | CallFailure::User(m) => m,
        }
    }
}

/// A constructed user object exposing named callable methods.
pub trait UserObject: Send {
    fn call(&mut self, method: &str, args: CallArguments) -> Result<Value, CallFailure>;
}

/// Builds a [`UserObject`] from constructor arguments and the session's
/// scratch directory (where `SEND_FILE` just unpacked the code bundle) so a
/// constructor that loads a dynamic library or other plugin out of the
/// bundle has somewhere to look. Registered under a descriptor string in a
/// [`TaskRegistry`].
pub trait TaskConstructor: Send + Sync {
    fn construct(&self, args: CallArguments, scratch_dir: &Path) -> Result<Box<dyn UserObject>, String>;
}

impl<F> TaskConstructor for F
where
    F: Fn(CallArguments, &Path) -> Result<Box<dyn UserObject>, String> + Send + Sync,
{
    fn construct(&self, args: CallArguments, scratch_dir: &Path) -> Result<Box<dyn UserObject>, String> {
        self(args, scratch_dir)
    }
}

/// Process-wide map from opaque descriptor to constructor.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    constructors: Arc<DashMap<String, Arc<dyn TaskConstructor>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: impl Into<String>, constructor: impl TaskConstructor + 'static) {
        self.constructors.insert(descriptor.into(), Arc::new(constructor));
    }

    /// Resolve a descriptor and construct the user object, or an
    /// `Err(message)` describing why the descriptor doesn't resolve or the
    /// constructor raised. `scratch_dir` is the session's unpacked bundle
    /// directory, passed through for constructors that load plugins out of it.
    pub fn construct(
        &self,
        descriptor: &str,
        args: CallArguments,
        scratch_dir: &Path,
    ) -> Result<Box<dyn UserObject>, String> {
        let constructor = self
            .constructors
            .get(descriptor)
            .ok_or_else(|| format!("no task registered for descriptor '{descriptor}'"))?
            .clone();
        constructor.construct(args, scratch_dir)
    }
}

/// Appends a synthetic traceback to an exception message, matching the
/// shape the wire protocol's exception payloads carry. There's no
/// interpreter stack to report in a compiled binary, so this captures the
/// Rust backtrace at the call site instead -- callers that want a real
/// trace should set `RUST_BACKTRACE=1` in the job's environment; regardless,
/// the `"traceback"` marker the client-side tooling looks for is always
/// present.
pub fn format_exception(message: &str) -> String {
    let backtrace = std::backtrace::Backtrace::force_capture();
    format!("{message}\ntraceback:\n{backtrace}")
}
