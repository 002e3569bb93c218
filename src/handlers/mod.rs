pub mod shell_handlers;
