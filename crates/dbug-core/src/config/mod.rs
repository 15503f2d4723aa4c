//! Configuration templates, their compiled form and template-set diffing.
mod compiled;
pub(crate) mod compiler;
mod set;
mod template;

pub use compiled::{CompiledConfig, CompiledVariable, Dependencies, DependencySet, EventConfig};
pub use set::{ConfigChange, ConfigSet};
pub use template::{
    ConfigTemplate, DbugDocument, EventConfigTemplate, EventVariableTemplate, ReporterDecl,
    VariableTemplate,
};
