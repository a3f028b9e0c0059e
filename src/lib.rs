pub mod compiler;
pub mod lexer;
pub mod num;
pub mod reader;
pub mod value;
pub mod world;

pub use compiler::{
    compile, CompileError, CompileErrorKind, CompileOptions, CompileResult, Compiler, FuncDef,
    FuncDefFlags,
};
pub use num::Number;
pub use reader::{read_all, Parsed, ReadError, SourceMap, MAX_NESTING};
pub use value::{Builtin, BuiltinId, Kinds, Symbol, Value};
pub use world::{Global, World, STANDARD_BUILTINS};
