//! Reporters shipped with dbug.
//!
//! [`register_defaults`] makes them available to configuration documents under the kinds
//! `print`, `log`, `profile` and `db`.
mod db;
mod depth;
pub mod format;
mod logging;
mod print;
pub mod profile;

use dbug_core::{Dbug, Reporter, ReporterDecl, ReporterResult};

pub use crate::db::DbReporter;
pub use crate::logging::LogReporter;
pub use crate::print::PrintReporter;
pub use crate::profile::{ProfileNode, ProfilingReporter, ThreadProfile};

pub type FactoryFn = fn(&ReporterDecl) -> ReporterResult<Box<dyn Reporter>>;

fn print_factory(_: &ReporterDecl) -> ReporterResult<Box<dyn Reporter>> {
    Ok(Box::new(PrintReporter::new()))
}

fn log_factory(_: &ReporterDecl) -> ReporterResult<Box<dyn Reporter>> {
    Ok(Box::new(LogReporter::default()))
}

fn profile_factory(_: &ReporterDecl) -> ReporterResult<Box<dyn Reporter>> {
    Ok(Box::new(ProfilingReporter::new()))
}

fn db_factory(_: &ReporterDecl) -> ReporterResult<Box<dyn Reporter>> {
    Ok(Box::new(DbReporter::open_in_memory()?))
}

/// Factories by reporter kind. The runtime configures each created reporter from its
/// declaration.
pub fn default_factories() -> Vec<(&'static str, FactoryFn)> {
    vec![
        ("print", print_factory as FactoryFn),
        ("log", log_factory),
        ("profile", profile_factory),
        ("db", db_factory),
    ]
}

pub fn register_defaults(dbug: &Dbug) {
    for (kind, factory) in default_factories() {
        dbug.register_factory(kind, factory);
    }
}
