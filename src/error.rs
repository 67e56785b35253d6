use std::io;

use thiserror::Error;

use crate::ast::{Op, Position};
use crate::value::Kind;

/// Represents all possible errors that can occur within the `utpl` crate.
///
/// Every render-time variant carries the source position of the offending
/// AST node. Directive failures wrap their cause, so the chain reads outer
/// tag → inner expression → root cause.
#[derive(Error, Debug)]
pub enum Error {
    /// A syntax error surfaced from the template parser.
    #[error("{pos}: syntax error: {msg}")]
    Parse { pos: Position, msg: String },

    #[error("{pos}: no such variable: {name}")]
    NoSuchVariable { pos: Position, name: String },

    #[error("{pos}: no such function: {name}")]
    NoSuchFunction { pos: Position, name: String },

    #[error("{pos}: no such method: {name}")]
    NoSuchMethod { pos: Position, name: String },

    #[error("{pos}: no such field: {name}")]
    NoSuchField { pos: Position, name: String },

    #[error("{pos}: no such tag: {name}")]
    NoSuchTag { pos: Position, name: String },

    #[error("{pos}: no such template: {name}")]
    NoSuchTemplate { pos: Position, name: String },

    #[error("{pos}: no such macro: {name}")]
    NoSuchMacro { pos: Position, name: String },

    #[error("{pos}: mismatched types ({left} and {right})")]
    TypeMismatch {
        pos: Position,
        left: Kind,
        right: Kind,
    },

    #[error("{pos}: operator {op} is not supported for {kind} values")]
    UnsupportedOp { pos: Position, op: Op, kind: Kind },

    #[error("{pos}: operator {op} cannot be applied to nil")]
    NilOperand { pos: Position, op: Op },

    #[error("{pos}: logical operations may only be performed on boolean values")]
    LogicalNonBool { pos: Position },

    #[error("{pos}: the not operator cannot be used on a non-bool value")]
    NotNonBool { pos: Position },

    #[error("{pos}: the in operator can only be used on strings, arrays, and maps (got {left} and {right})")]
    InOpInvalidTypes {
        pos: Position,
        left: Kind,
        right: Kind,
    },

    #[error("{pos}: ternary condition must be a boolean (got {kind})")]
    TernaryCondNotBool { pos: Position, kind: Kind },

    #[error("{pos}: modulo operation cannot be performed on floats")]
    ModulusFloat { pos: Position },

    #[error("{pos}: division by zero")]
    DivisionByZero { pos: Position },

    #[error("{pos}: incorrect parameter amount: {got} (expected {expected})")]
    ParamCount {
        pos: Position,
        got: usize,
        expected: usize,
    },

    #[error("{pos}: incorrect parameter type: {got} (expected {expected})")]
    ParamType {
        pos: Position,
        got: Kind,
        expected: Kind,
    },

    /// The call target is not a callable with a valid signature.
    #[error("{pos}: cannot call a {kind} value")]
    InvalidCallable { pos: Position, kind: Kind },

    #[error("{pos}: assignment cannot be used as a function argument")]
    AssignmentAsArgument { pos: Position },

    /// An error returned by a callable itself.
    #[error("{pos}: {msg}")]
    Call { pos: Position, msg: String },

    #[error("{pos}: index {index} out of range (length {len})")]
    IndexOutOfRange {
        pos: Position,
        index: i64,
        len: usize,
    },

    #[error("{pos}: invalid index type: {got} (expected {expected})")]
    InvalidIndexType {
        pos: Position,
        got: Kind,
        expected: Kind,
    },

    #[error("{pos}: map key not found: {key}")]
    MapKeyNotFound { pos: Position, key: String },

    #[error("{pos}: a {kind} value cannot be indexed")]
    CannotIndex { pos: Position, kind: Kind },

    #[error("{pos}: cannot access field {name} on a nil value")]
    FieldOnNil { pos: Position, name: String },

    #[error("{pos}: a {kind} value has no fields")]
    NoFields { pos: Position, kind: Kind },

    #[error("{pos}: end tag without a start tag: {name}")]
    EndTagWithoutStart { pos: Position, name: String },

    #[error("{pos}: cannot have more than one else tag in an if tag")]
    MultipleElse { pos: Position },

    #[error("{pos}: {msg}")]
    InvalidTagArguments { pos: Position, msg: String },

    #[error("{pos}: maximum template recursion depth exceeded")]
    RecursionTooDeep { pos: Position },

    /// A failure inside a directive, wrapping the underlying cause.
    #[error("{pos}: in tag {name}")]
    Tag {
        pos: Position,
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// A write to the output failed during rendering.
    #[error("{pos}: {source}")]
    Write {
        pos: Position,
        #[source]
        source: io::Error,
    },

    /// An I/O failure while loading template sources.
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    /// A value conversion or serialization failure.
    #[error("{0}")]
    Value(String),
}

impl serde::ser::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::Value(msg.to_string())
    }
}
