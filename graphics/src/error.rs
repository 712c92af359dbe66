//! Graphics error types and the fatal-error reporter.
//!
//! Fallible building blocks (reflection, layout merging, shader loading, backend
//! calls) return [`GraphicsError`]. Contract violations detected while a frame is
//! being recorded have no recovery path and go through [`fatal`], which logs the
//! error with its context and terminates the render thread.

use std::fmt;

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    InitializationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// Out of GPU memory or descriptor pool space.
    OutOfMemory(String),
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// A handle was destroyed or never belonged to this backend.
    InvalidHandle(String),
    /// Shader source failed to compile to bytecode.
    ShaderCompilationFailed(String),
    /// Shader bytecode could not be reflected.
    ShaderReflectionFailed(String),
    /// Two shader stages declare the same (set, binding) differently.
    BindingConflict {
        set: u32,
        binding: u32,
        first: String,
        second: String,
    },
    /// A binding name or index does not exist in a layout.
    UnknownBinding(String),
    /// A required binding or vertex attribute was never provided.
    MissingBinding(String),
    /// A copy or write does not fit in the destination buffer.
    BufferTooSmall {
        buffer: String,
        required: u64,
        available: u64,
    },
    /// A render pass with the same name is already registered.
    DuplicatePass(String),
    /// Reading or writing a file failed.
    Io(String),
    /// A configuration document could not be parsed.
    Config(String),
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::OutOfMemory(msg) => write!(f, "out of GPU memory: {msg}"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::InvalidHandle(msg) => write!(f, "invalid handle: {msg}"),
            Self::ShaderCompilationFailed(msg) => write!(f, "shader compilation failed: {msg}"),
            Self::ShaderReflectionFailed(msg) => write!(f, "shader reflection failed: {msg}"),
            Self::BindingConflict {
                set,
                binding,
                first,
                second,
            } => write!(
                f,
                "binding conflict at set {set}, binding {binding}: {first} vs {second}"
            ),
            Self::UnknownBinding(msg) => write!(f, "unknown binding: {msg}"),
            Self::MissingBinding(msg) => write!(f, "missing required binding: {msg}"),
            Self::BufferTooSmall {
                buffer,
                required,
                available,
            } => write!(
                f,
                "buffer '{buffer}' too small: {required} bytes required, {available} available"
            ),
            Self::DuplicatePass(name) => write!(f, "duplicate render pass name '{name}'"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}

impl From<std::io::Error> for GraphicsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Report an unrecoverable graphics error and terminate.
///
/// `context` names the object or operation that failed (a pass, a writer, a
/// buffer) so the log line points at the authoring defect.
#[cold]
#[track_caller]
pub fn fatal(context: &str, error: GraphicsError) -> ! {
    log::error!("{context}: {error}");
    panic!("{context}: {error}");
}

/// Unwrap a result or report it through [`fatal`].
pub(crate) trait OrFatal<T> {
    fn or_fatal(self, context: &str) -> T;
}

impl<T> OrFatal<T> for Result<T, GraphicsError> {
    #[track_caller]
    fn or_fatal(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(context, err),
        }
    }
}
