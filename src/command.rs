//! Command table mapping request methods to their evaluators.
//!
//! Nothing registers itself: a process builds its table once at startup with
//! [`CommandRegistry::with_builtin_commands`] (or registers commands one by
//! one on an empty registry).

use std::collections::BTreeMap;
use std::fmt;

use crate::ingest::{
    eval_add_sstable, AddSstableRequest, AddSstableResult, EvalContext, IngestError, KeyRange,
};
use crate::stats::MvccStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    AddSstable,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::AddSstable => f.write_str("AddSSTable"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Request {
    AddSstable(AddSstableRequest),
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::AddSstable(_) => Method::AddSstable,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Response {
    AddSstable(AddSstableResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanAccess {
    ReadOnly,
    ReadWrite,
}

/// A key span a command touches, declared before evaluation so the caller
/// can serialize conflicting commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSpan {
    pub span: KeyRange,
    pub access: SpanAccess,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("command {0} already registered")]
    AlreadyRegistered(Method),

    #[error("no command registered for {0}")]
    Unregistered(Method),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

pub trait Command: Send + Sync {
    fn method(&self) -> Method;

    fn declare_spans(&self, request: &Request) -> Vec<DeclaredSpan>;

    /// Evaluates `request`, adding its stats delta to `stats` only if
    /// evaluation succeeds.
    fn eval(
        &self,
        ctx: &EvalContext<'_>,
        request: &Request,
        stats: &mut MvccStats,
    ) -> Result<Response, CommandError>;
}

/// Links an externally built table into the range.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddSstableCommand;

impl Command for AddSstableCommand {
    fn method(&self) -> Method {
        Method::AddSstable
    }

    fn declare_spans(&self, request: &Request) -> Vec<DeclaredSpan> {
        match request {
            Request::AddSstable(req) => vec![DeclaredSpan {
                span: req.span.clone(),
                access: SpanAccess::ReadWrite,
            }],
        }
    }

    fn eval(
        &self,
        ctx: &EvalContext<'_>,
        request: &Request,
        stats: &mut MvccStats,
    ) -> Result<Response, CommandError> {
        let Request::AddSstable(req) = request;
        let result = eval_add_sstable(ctx, req)?;
        stats.add(&result.stats_delta);
        Ok(Response::AddSstable(result))
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<Method, Box<dyn Command>>,
}

impl CommandRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every command this crate implements.
    pub fn with_builtin_commands() -> Self {
        let mut registry = Self::new();
        registry
            .commands
            .insert(Method::AddSstable, Box::new(AddSstableCommand));
        registry
    }

    pub fn register(&mut self, command: Box<dyn Command>) -> Result<(), CommandError> {
        let method = command.method();
        if self.commands.contains_key(&method) {
            return Err(CommandError::AlreadyRegistered(method));
        }
        self.commands.insert(method, command);
        Ok(())
    }

    pub fn get(&self, method: Method) -> Option<&dyn Command> {
        self.commands.get(&method).map(|c| c.as_ref())
    }

    pub fn methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.commands.keys().copied()
    }

    fn lookup(&self, request: &Request) -> Result<&dyn Command, CommandError> {
        let method = request.method();
        self.get(method).ok_or(CommandError::Unregistered(method))
    }

    pub fn declare_spans(&self, request: &Request) -> Result<Vec<DeclaredSpan>, CommandError> {
        Ok(self.lookup(request)?.declare_spans(request))
    }

    pub fn eval(
        &self,
        ctx: &EvalContext<'_>,
        request: &Request,
        stats: &mut MvccStats,
    ) -> Result<Response, CommandError> {
        self.lookup(request)?.eval(ctx, request, stats)
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.commands.keys()).finish()
    }
}
