/// Command module: recorded commands, command lists and the command queue

mod command;
mod command_list;
mod command_queue;

pub use command::*;
pub use command_list::*;
pub use command_queue::*;
