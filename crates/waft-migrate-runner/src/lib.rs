mod command;
mod postgres;

pub use command::{
    command_failure, describe_command, run_attached, run_command, run_system, shell_command,
    CommandFailed, CommandOutput, RunOptions,
};
pub use postgres::{quote_identifier, quote_literal, Postgres};
