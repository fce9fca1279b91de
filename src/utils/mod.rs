//! Input parsing helpers: port lists, targets and target files

pub mod file_input;
pub mod port_spec;
pub mod target_parser;
