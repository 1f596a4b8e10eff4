mod directives;
mod executor;
mod interpreter;
mod resolver;
mod script;

pub use directives::{is_supported, read_directives, Directives, ModuleProbe};
pub use executor::{StageExecutor, StageReport};
pub use interpreter::{app_bootstrap_program, BuildInterpreter, HookInterpreter};
pub use resolver::{HookResolver, ScriptNotFound};
pub use script::{HookKind, HookScript};
